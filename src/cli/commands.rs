use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "medichat", version, about = "Medichat consultation server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file path globally
    #[arg(short, long, global = true, default_value = "config.yaml")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and WebSocket server
    Serve,

    /// Consult an AI expert from the terminal
    Chat {
        /// The UUID of the expert to consult
        #[arg(short, long, required_unless_present = "resume")]
        expert: Option<Uuid>,
        /// Patient identifier stamped on the consultation
        #[arg(short, long)]
        patient: String,
        /// Continue a stored consultation instead of starting one
        #[arg(short, long)]
        resume: Option<Uuid>,
    },

    /// Manage the AI expert catalogue
    Expert {
        #[command(subcommand)]
        action: ExpertAction,
    },

    /// Inspect stored consultations
    Consultation {
        #[command(subcommand)]
        action: ConsultationAction,
    },

    /// Review doctor referrals
    Referral {
        #[command(subcommand)]
        action: ReferralAction,
    },
}

#[derive(Subcommand)]
pub enum ExpertAction {
    /// List all experts
    List,

    /// Add an expert
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        specialty: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// May be repeated
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConsultationAction {
    /// List consultations, newest first
    List {
        /// Only consultations of this patient
        #[arg(short, long)]
        patient: Option<String>,
    },

    /// Print a consultation transcript
    Show {
        id: Uuid,
    },

    /// Export a consultation to a .txt file
    Export {
        /// The UUID of the consultation to export
        id: Uuid,
        /// The path to the output file (optional)
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ReferralAction {
    /// List referrals
    List {
        /// pending, accepted or declined
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Accept a pending referral
    Accept {
        id: Uuid,
    },

    /// Decline a pending referral
    Decline {
        id: Uuid,
        #[arg(short, long)]
        reason: Option<String>,
    },
}
