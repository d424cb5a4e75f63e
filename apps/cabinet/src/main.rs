use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client_core::{
    AudioInput, ClientSettings, Credentials, DocumentFile, FileAudioInput, HttpBackend,
    SessionManager, WorkspaceController,
};
use shared::{
    domain::PatientId,
    protocol::{Consultation, PatientDraft, DICTATION_FILENAME},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cabinet", about = "Operator client for the cabinet clinical backend")]
struct Cli {
    /// Settings file; defaults to ./cabinet.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates the account, logging in if the backend returns a token.
    Signup,
    Whoami,
    Patients {
        #[command(subcommand)]
        action: PatientsCommand,
    },
    History {
        #[arg(long)]
        patient: i64,
    },
    /// Streams an audio file through the dictation pipeline.
    Dictate {
        #[arg(long)]
        patient: i64,
        #[arg(long)]
        audio: PathBuf,
    },
    Document {
        #[arg(long)]
        patient: i64,
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum PatientsCommand {
    List,
    Add {
        #[arg(long)]
        nom: String,
        #[arg(long)]
        prenom: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date_naissance: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let cli = Cli::parse();

    let mut settings = ClientSettings::load(cli.config.as_deref())?;
    if let Some(url) = &cli.backend_url {
        settings = settings.with_backend_url(url)?;
    }
    let backend = Arc::new(HttpBackend::new(&settings)?);
    info!(backend_url = %backend.base_url(), "cabinet: using backend");
    let sessions = SessionManager::new(backend, &settings);
    let credentials = Credentials::new(cli.email, cli.password);

    if let Command::Signup = cli.command {
        match sessions.signup(&credentials).await? {
            Some(_) => println!("account created; logged in"),
            None => println!("account created; log in to continue"),
        }
        return Ok(());
    }

    sessions
        .login(&credentials)
        .await
        .context("login failed")?;

    let mut workspace = WorkspaceController::new(
        Arc::clone(&sessions),
        audio_input(&cli.command),
        &settings,
    );
    let mut phases = workspace.subscribe_capture();
    tokio::spawn(async move {
        while let Ok(phase) = phases.recv().await {
            info!(?phase, "cabinet: dictation phase");
        }
    });

    match cli.command {
        Command::Signup => {}
        Command::Whoami => println!("{}", sessions.whoami().await?),
        Command::Patients { action } => {
            workspace.mount().await?;
            if let PatientsCommand::Add {
                nom,
                prenom,
                date_naissance,
            } = action
            {
                let created = workspace
                    .add_patient(PatientDraft {
                        nom,
                        prenom,
                        date_naissance,
                    })
                    .await?;
                println!("created patient_id={}", created.id);
            }
            for patient in workspace.patients() {
                let born = patient
                    .date_naissance
                    .map(|date| date.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}\t{born}", patient.id, patient.nom, patient.prenom);
            }
        }
        Command::History { patient } => {
            workspace.mount().await?;
            workspace.select_patient(PatientId(patient)).await?;
            for consultation in workspace.history() {
                print_consultation(consultation);
            }
        }
        Command::Dictate { patient, .. } => {
            workspace.mount().await?;
            workspace.select_patient(PatientId(patient)).await?;
            workspace.start_dictation().await?;
            let committed = workspace.stop_dictation().await?;
            print_consultation(&committed);
        }
        Command::Document { patient, file } => {
            workspace.mount().await?;
            workspace.select_patient(PatientId(patient)).await?;
            let document = DocumentFile::from_path(&file).await?;
            let committed = workspace.submit_document(Some(document)).await?;
            print_consultation(&committed);
        }
    }

    workspace.logout().await;
    Ok(())
}

/// Only `dictate` records. The other commands get an input that is never opened.
fn audio_input(command: &Command) -> Arc<dyn AudioInput> {
    let path = match command {
        Command::Dictate { audio, .. } => audio.clone(),
        _ => PathBuf::from(DICTATION_FILENAME),
    };
    Arc::new(FileAudioInput::new(path))
}

fn print_consultation(consultation: &Consultation) {
    println!(
        "{}\t{}\t{}\t{}",
        consultation.id,
        consultation.creation_date.format("%Y-%m-%d %H:%M"),
        consultation.kind.label(),
        consultation.content
    );
}
