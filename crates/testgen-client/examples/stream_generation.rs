use std::io::BufRead as _;
use std::sync::Arc;

use testgen_client::prelude::*;
use testgen_client::{init_observability, session::LogLevel};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    init_observability();

    let message = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let message = if message.trim().is_empty() {
        "generate a login test".to_string()
    } else {
        message
    };

    let session = Arc::new(SessionOrchestrator::connect(ClientConfig::from_env()?)?);
    let mut updates = session.subscribe();
    let observer = Arc::clone(&session);
    tokio::spawn(async move {
        loop {
            let update = match updates.recv().await {
                Ok(update) => update,
                Err(RecvError::Lagged(missed)) => {
                    let state = observer.snapshot();
                    println!(
                        "[resync] missed {missed} updates; status {:?}, {} log lines",
                        state.status,
                        state.logs.len()
                    );
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match update {
                SessionUpdate::StatusChanged(status) => println!("[status] {status:?}"),
                SessionUpdate::LogAppended(entry) if entry.level == LogLevel::Error => {
                    eprintln!("[log] {}", entry.content)
                }
                SessionUpdate::LogAppended(entry) => println!("[log] {}", entry.content),
                SessionUpdate::MessageAppended(msg) => println!("[{:?}] {}", msg.role, msg.content),
                SessionUpdate::PlanReplaced(plan) => println!("[plan]\n{plan}"),
                SessionUpdate::Notice { message, .. } => println!("[notice] {message}"),
                _ => {}
            }
        }
    });

    let mut status = session.send_message(&message).await?;
    while status == GenerationStatus::WaitingForApproval {
        println!("Approve this plan? [y/N, or type feedback to reject]");
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            break;
        }
        let answer = line.trim();
        let approval = if answer.eq_ignore_ascii_case("y") {
            Approval::approve()
        } else {
            Approval::reject(answer)
        };
        status = session.approve_plan(approval).await?;
    }

    println!("{}", session.snapshot().code);
    Ok(())
}
