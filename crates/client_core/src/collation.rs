//! Surname ordering for the patient directory.
//!
//! Approximates a French-locale collation without ICU: letters compare
//! ignoring case and accents first, then accents break ties (unaccented
//! first), then case (lowercase first).

use std::cmp::Ordering;

pub fn compare_surnames(a: &str, b: &str) -> Ordering {
    primary_key(a)
        .cmp(&primary_key(b))
        .then_with(|| secondary_key(a).cmp(&secondary_key(b)))
        .then_with(|| tertiary_key(a).cmp(&tertiary_key(b)))
}

fn primary_key(value: &str) -> String {
    let mut key = String::with_capacity(value.len());
    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        match ch {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => key.push('a'),
            'æ' => key.push_str("ae"),
            'ç' | 'ć' | 'č' => key.push('c'),
            'ď' | 'đ' => key.push('d'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => key.push('e'),
            'ğ' => key.push('g'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => key.push('i'),
            'ł' => key.push('l'),
            'ñ' | 'ń' | 'ň' => key.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => key.push('o'),
            'œ' => key.push_str("oe"),
            'ř' => key.push('r'),
            'ś' | 'š' | 'ş' => key.push('s'),
            'ß' => key.push_str("ss"),
            'ť' => key.push('t'),
            'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => key.push('u'),
            'ý' | 'ÿ' => key.push('y'),
            'ź' | 'ż' | 'ž' => key.push('z'),
            other => key.push(other),
        }
    }
    key
}

fn secondary_key(value: &str) -> Vec<u8> {
    value
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(accent_rank)
        .collect()
}

/// Diacritic weight in the order the Unicode collation table gives Latin
/// accents: acute, grave, breve, circumflex, caron, ring, diaeresis, double
/// acute, tilde, dot, cedilla, ogonek, macron. Unaccented letters weigh 0.
fn accent_rank(ch: char) -> u8 {
    match ch {
        'á' | 'é' | 'í' | 'ó' | 'ú' | 'ý' | 'ć' | 'ń' | 'ś' | 'ź' => 1,
        'à' | 'è' | 'ì' | 'ò' | 'ù' => 2,
        'ă' | 'ğ' => 3,
        'â' | 'ê' | 'î' | 'ô' | 'û' => 4,
        'č' | 'ď' | 'ě' | 'ň' | 'ř' | 'š' | 'ť' | 'ž' => 5,
        'å' | 'ů' => 6,
        'ä' | 'ë' | 'ï' | 'ö' | 'ü' | 'ÿ' => 7,
        'ő' | 'ű' => 8,
        'ã' | 'ñ' | 'õ' => 9,
        'ė' | 'ż' => 10,
        'ç' | 'ş' => 11,
        'ą' | 'ę' | 'į' | 'ų' => 12,
        'ā' | 'ē' | 'ī' | 'ō' | 'ū' => 13,
        'đ' | 'ł' | 'ø' => 14,
        _ => 0,
    }
}

fn tertiary_key(value: &str) -> Vec<bool> {
    value.trim().chars().map(char::is_uppercase).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_case_at_first_level() {
        assert_eq!(compare_surnames("durand", "Martin"), Ordering::Less);
        assert_eq!(compare_surnames("Martin", "dupont"), Ordering::Greater);
    }

    #[test]
    fn accented_letters_sort_with_their_base_letter() {
        assert_eq!(compare_surnames("Émile", "Fabre"), Ordering::Less);
        assert_eq!(compare_surnames("Écuyer", "Dubois"), Ordering::Greater);
        assert_eq!(compare_surnames("Lœtitia", "Loez"), Ordering::Less);
    }

    #[test]
    fn accents_and_case_only_break_ties() {
        assert_eq!(compare_surnames("Emile", "Émile"), Ordering::Less);
        assert_eq!(compare_surnames("martin", "Martin"), Ordering::Less);
        assert_eq!(compare_surnames("Martin", "Martin"), Ordering::Equal);
    }

    #[test]
    fn acute_sorts_before_grave_and_circumflex() {
        assert_eq!(compare_surnames("Lefébure", "Lefèbure"), Ordering::Less);
        assert_eq!(compare_surnames("Lefèbure", "Lefêbure"), Ordering::Less);
        assert_eq!(compare_surnames("Lefebure", "Lefébure"), Ordering::Less);
        assert_eq!(compare_surnames("côte", "coté"), Ordering::Greater);
    }
}
