pub mod commands;

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

use crate::cli::commands::{Commands, ConsultationAction, ExpertAction, ReferralAction};
use crate::config::AppConfig;
use crate::consultation::{ConsultationService, SessionView};
use crate::db::{get_connection, service::DbService, DbPool, ReviewOutcome};
use crate::store::DuckDbStore;
use crate::triage::{ConsultationError, Message, ReferralDecision, ReferralStatus, Role};

type CliResult = Result<(), Box<dyn Error>>;

fn open_db(config: &AppConfig) -> Result<DbPool, Box<dyn Error>> {
    let pool = get_connection(&config.database)?;
    {
        let conn = pool.lock().map_err(|_| "Database lock poisoned")?;
        DbService::seed_experts(&conn, &config.experts)?;
    }
    Ok(pool)
}

pub async fn run_cli(command: Commands, config_path: String) -> CliResult {
    let config = AppConfig::load(&config_path)?;

    match command {
        Commands::Serve => Err("Serve command should be intercepted by main.rs to boot actix-web".into()),
        Commands::Chat { expert, patient, resume } => run_repl(expert, resume, patient, config).await,
        Commands::Expert { action } => {
            let pool = open_db(&config)?;
            let conn = pool.lock().map_err(|_| "Database lock poisoned")?;

            match action {
                ExpertAction::List => {
                    let experts = DbService::list_experts(&conn)?;
                    if experts.is_empty() {
                        println!("No experts found.");
                    } else {
                        println!("{:<38} | {:<24} | {}", "ID", "Specialty", "Name");
                        println!("{:-<38}-+-{:-<24}-+-{:-<20}", "", "", "");
                        for e in experts {
                            println!("{:<38} | {:<24} | {}", e.id.to_string(), e.specialty, e.name);
                        }
                    }
                }
                ExpertAction::Add {
                    name,
                    specialty,
                    description,
                    capabilities,
                } => {
                    let expert = DbService::insert_expert(&conn, &name, &specialty, &description, &capabilities)?;
                    println!("Created Expert: {} ({})", expert.name, expert.id);
                }
            }
            Ok(())
        }
        Commands::Consultation { action } => {
            let pool = open_db(&config)?;
            let conn = pool.lock().map_err(|_| "Database lock poisoned")?;

            match action {
                ConsultationAction::List { patient } => {
                    let records = DbService::list_consultations(&conn, patient.as_deref(), 50, 0)?;
                    if records.is_empty() {
                        println!("No consultations found.");
                    } else {
                        println!("{:<38} | {:<12} | {:<8} | {}", "ID", "Status", "Severity", "Symptoms");
                        println!("{:-<38}-+-{:-<12}-+-{:-<8}-+-{:-<20}", "", "", "", "");
                        for r in records {
                            println!(
                                "{:<38} | {:<12} | {:<8} | {}",
                                r.id.to_string(),
                                r.status.as_str(),
                                r.severity.as_str(),
                                r.summary
                            );
                        }
                    }
                }
                ConsultationAction::Show { id } => match DbService::export_transcript(&conn, id)? {
                    Some(transcript) => print!("{}", transcript),
                    None => eprintln!("Consultation {} not found.", id),
                },
                ConsultationAction::Export { id, path } => {
                    let transcript = match DbService::export_transcript(&conn, id)? {
                        Some(t) => t,
                        None => {
                            eprintln!("Consultation {} not found.", id);
                            return Ok(());
                        }
                    };
                    let export_path = path.unwrap_or_else(|| format!("consultation_{}.txt", id));
                    std::fs::write(&export_path, transcript)?;
                    println!("Consultation exported successfully to: {}", export_path);
                }
            }
            Ok(())
        }
        Commands::Referral { action } => {
            let pool = open_db(&config)?;
            let conn = pool.lock().map_err(|_| "Database lock poisoned")?;

            let (id, decision) = match action {
                ReferralAction::List { status } => {
                    let status = status.map(|s| s.parse::<ReferralStatus>()).transpose()?;
                    let referrals = DbService::list_referrals(&conn, status, 50, 0)?;
                    if referrals.is_empty() {
                        println!("No referrals found.");
                    }
                    for r in referrals {
                        println!("{} [{}] severity={} patient={}", r.id, r.status, r.severity, r.patient_id);
                        println!("  Symptoms: {}", r.symptoms);
                        if !r.assessment.is_empty() {
                            println!("  Assessment: {}", r.assessment);
                        }
                        if let Some(reason) = &r.decline_reason {
                            println!("  Declined: {}", reason);
                        }
                    }
                    return Ok(());
                }
                ReferralAction::Accept { id } => (id, ReferralDecision::Accept),
                ReferralAction::Decline { id, reason } => (id, ReferralDecision::Decline { reason }),
            };

            match DbService::review_referral(&conn, id, &decision)? {
                ReviewOutcome::Reviewed(r) => println!("Referral {} is now {}", r.id, r.status),
                ReviewOutcome::NotPending(r) => eprintln!("Referral {} was already {}", r.id, r.status),
                ReviewOutcome::NotFound => eprintln!("Referral {} not found.", id),
            }
            Ok(())
        }
    }
}

fn print_message(expert_name: &str, m: &Message) {
    match m.role {
        Role::User => println!("You> {}", m.content),
        Role::Assistant => println!("{}> {}", expert_name, m.content),
    }
}

fn print_summary(view: &SessionView) {
    println!("--- Consultation Summary ---");
    if view.symptoms.is_empty() {
        println!("Identified symptoms: none yet");
    } else {
        println!("Identified symptoms: {}", view.symptoms.join(", "));
    }
    println!("Severity: {}", view.severity);
    if let Some(assessment) = &view.assessment {
        println!("Assessment: {}", assessment);
    }
    if view.referral_sent {
        println!("Referral sent to doctor.");
    } else if view.referral_available {
        println!("Based on your symptoms, we recommend a consultation with a doctor. Type /refer to send a referral.");
    }
    println!("----------------------------");
}

async fn run_repl(expert_id: Option<Uuid>, resume: Option<Uuid>, patient: String, config: AppConfig) -> CliResult {
    let pool = open_db(&config)?;
    let service = ConsultationService::new(Arc::new(DuckDbStore::new(pool.clone())), config.consultation.clone());

    let view = match resume {
        Some(id) => match service.resume(id, &patient).await {
            Ok(view) => view,
            Err(ConsultationError::NoActiveSession) => {
                eprintln!("Consultation {} not found for patient {}.", id, patient);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            let expert_id = expert_id.ok_or("An expert id is required")?;
            let expert = {
                let conn = pool.lock().map_err(|_| "Database lock poisoned")?;
                DbService::get_expert(&conn, expert_id)?
            };
            match expert {
                Some(expert) => service.start(&expert, &patient).await,
                None => {
                    eprintln!("Expert {} not found.", expert_id);
                    return Ok(());
                }
            }
        }
    };

    let expert_name = {
        let conn = pool.lock().map_err(|_| "Database lock poisoned")?;
        DbService::get_expert(&conn, view.expert_id)?
            .map(|e| e.name)
            .unwrap_or_else(|| "Expert".to_string())
    };

    println!("--- Medichat Consultation ---");
    println!("Consultation: {}", view.id);
    println!("Commands: /summary, /refer, /sync, /exit");
    println!("-----------------------------");
    for m in &view.messages {
        print_message(&expert_name, m);
    }

    let id = view.id;
    loop {
        print!("\nYou> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let text = input.trim();

        if text.is_empty() {
            continue;
        }
        if text == "/exit" || text == "/quit" {
            break;
        }

        match text {
            "/summary" => print_summary(&service.snapshot(id, &patient).await?),
            "/sync" => {
                if service.sync(id, &patient).await? {
                    println!("All messages saved.");
                } else {
                    println!("Some messages are still waiting to be saved.");
                }
            }
            "/refer" => match service.send_referral(id, &patient).await {
                Ok(receipt) => {
                    print_message(&expert_name, &receipt.announcement);
                    if receipt.sync_pending {
                        println!("(sync pending)");
                    }
                }
                Err(e @ (ConsultationError::AlreadyReferred | ConsultationError::ReferralNotOffered)) => {
                    println!("Notice: {}", e);
                }
                Err(e) => return Err(e.into()),
            },
            _ => {
                let turn = service.submit_turn(id, &patient, text).await?;
                print_message(&expert_name, &turn.reply);
                if turn.sync_pending {
                    println!("(sync pending)");
                }
                if turn.referral_available {
                    println!("Based on your symptoms, we recommend a consultation with a doctor. Type /refer to send a referral.");
                }
            }
        }
    }

    if let Err(e) = service.end(id, &patient).await {
        eprintln!("Consultation closed with unsaved messages: {}", e);
    }
    Ok(())
}
