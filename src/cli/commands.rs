//! CLI command implementations

use anyhow::Result;
use dialoguer::{Confirm, Password};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::recovery::{LocalManager, Mnemonic, QueueSnapshot, WalletAddress};
use crate::session::{RecoverySession, SessionTimeouts};
use crate::signing::{ConnectionKind, SigningDecision, SigningRequest, SigningView};

/// Build a session backed by the configured local manager
fn open_session(config: &Config) -> Arc<RecoverySession> {
    let manager = Arc::new(LocalManager::new(&config.manager.state_path));
    Arc::new(RecoverySession::new(manager, SessionTimeouts::from(config)))
}

/// Prompt until the user enters a well-formed mnemonic
async fn prompt_mnemonic() -> Result<Mnemonic> {
    loop {
        let input = tokio::task::spawn_blocking(|| {
            Password::new()
                .with_prompt("Recovery mnemonic")
                .interact()
        })
        .await??;

        match Mnemonic::parse(&input) {
            Ok(mnemonic) => return Ok(mnemonic),
            Err(e) => println!("{}", e),
        }
    }
}

/// Run the credential hand-off interactively, offering retries on rejection
async fn recover_interactive(session: &Arc<RecoverySession>) -> Result<WalletAddress> {
    loop {
        let mut recovering = {
            let session = session.clone();
            tokio::spawn(async move { session.recover().await })
        };

        // Wait for the manager to ask, unless recovery already ended
        let finished = tokio::select! {
            result = &mut recovering => Some(result?),
            _ = session.credentials().pending() => None,
        };

        let result = match finished {
            Some(result) => result,
            None => {
                let mnemonic = prompt_mnemonic().await?;
                if !session.credentials().submit_credential(mnemonic) {
                    warn!("Credential request ended before the mnemonic was submitted");
                }
                recovering.await?
            }
        };

        match result {
            Ok(wallet) => return Ok(wallet),
            Err(e) if e.is_terminal() || e.is_retryable() => {
                println!("Recovery attempt failed: {}", e);
                let retry = Confirm::new()
                    .with_prompt("Try another mnemonic?")
                    .default(true)
                    .interact()?;
                if !retry {
                    anyhow::bail!("Recovery aborted: {}", e);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_queue(snapshot: &QueueSnapshot, chain_filter: Option<u64>) {
    if let Some(error) = &snapshot.error {
        println!("(refresh failed: {} - showing last known queue)", error);
    }

    let mut by_chain: BTreeMap<u64, Vec<_>> = BTreeMap::new();
    for payload in &snapshot.items {
        if chain_filter.map_or(true, |c| c == payload.chain_id) {
            by_chain.entry(payload.chain_id).or_default().push(payload);
        }
    }

    if let Some(at) = snapshot.refreshed_at {
        println!("Last refreshed: {}\n", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if by_chain.is_empty() {
        println!("No queued recovery payloads.");
        return;
    }

    for (chain_id, payloads) in by_chain {
        println!("Chain {}:", chain_id);
        for payload in payloads {
            let fields = serde_json::Value::Object(payload.fields.clone());
            println!("  {:<24} {}", payload.id, fields);
        }
        println!();
    }
}

/// Recover a wallet and show its recovery queue
pub async fn recover(config: &Config) -> Result<()> {
    let session = open_session(config);
    let wallet = recover_interactive(&session).await?;

    println!("\n=== RECOVERED WALLET ===\n");
    println!("Address: {}\n", wallet);

    session.refresh(None).await?;

    println!("=== RECOVERY QUEUE ===\n");
    print_queue(&session.queue().snapshot().await, None);

    Ok(())
}

/// Show (and optionally watch) the recovery queue
pub async fn queue(config: &Config, chain_id: Option<u64>, watch: bool) -> Result<()> {
    let session = open_session(config);
    let wallet = recover_interactive(&session).await?;
    info!(wallet = %wallet, "Loading recovery queue");

    session.refresh(chain_id).await?;
    println!("\n=== RECOVERY QUEUE ({}) ===\n", wallet);
    print_queue(&session.queue().snapshot().await, chain_id);

    if !watch {
        return Ok(());
    }

    let interval = config.queue.poll_interval();
    let cancel = CancellationToken::new();
    let poller = session.watch(chain_id, interval, cancel.clone()).await?;
    println!("Watching every {}s, Ctrl-C to stop\n", interval.as_secs());

    let mut last = session.queue().snapshot().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(interval) => {
                let snapshot = session.queue().snapshot().await;
                if snapshot.loading {
                    continue;
                }
                if !snapshot.same_content(&last) {
                    println!("=== RECOVERY QUEUE UPDATED ===\n");
                    print_queue(&snapshot, chain_id);
                    last = snapshot;
                }
            }
        }
    }

    cancel.cancel();
    poller.await?;
    Ok(())
}

fn parse_connection(connection: &str) -> Result<Option<ConnectionKind>> {
    match connection {
        "none" => Ok(None),
        "injected" => Ok(Some(ConnectionKind::Injected)),
        "wallet-connect" | "walletconnect" => Ok(Some(ConnectionKind::WalletConnect)),
        other => anyhow::bail!(
            "Unknown connection '{}' (expected injected, wallet-connect or none)",
            other
        ),
    }
}

fn describe_request(request: &SigningRequest) {
    match request {
        SigningRequest::Message(m) => {
            println!("Sign message on chain {}:", m.chain_id);
            match m.as_text() {
                Some(text) => println!("  {}", text),
                None => println!("  0x{}", hex::encode(&m.message)),
            }
        }
        SigningRequest::Transactions(t) => {
            println!(
                "Send {} transaction(s) on chain {} (origin: {})",
                t.transactions.len(),
                t.chain_id,
                t.origin.as_deref().unwrap_or("unknown")
            );
            for tx in &t.transactions {
                println!(
                    "  to {} value {}",
                    tx.to,
                    tx.value.as_deref().unwrap_or("0")
                );
            }
        }
    }
}

/// Present a signing request from a JSON file and print the decision
pub async fn sign(config: &Config, request_path: &Path, connection: &str) -> Result<()> {
    let content = tokio::fs::read_to_string(request_path).await?;
    let request: SigningRequest = serde_json::from_str(&content)?;
    let connection = parse_connection(connection)?;

    let session = open_session(config);
    recover_interactive(&session).await?;
    session.connect_external(connection);

    let chain_id = request.chain_id();
    let pending = session.present_signing(request).await?;
    let orchestrator = session.signing();

    loop {
        match orchestrator.view() {
            // Answered elsewhere (approval timeout)
            SigningView::Idle => break,
            SigningView::Blocked { warning, .. } => {
                println!("\nCannot sign yet: {}", warning);
                let recheck = Confirm::new()
                    .with_prompt("Re-check and keep waiting? (no cancels the request)")
                    .default(true)
                    .interact()?;
                if recheck {
                    session.sync_deployment(chain_id).await?;
                    if session.check_signable(chain_id).is_ok() {
                        println!("Signing preconditions met.");
                    }
                } else {
                    orchestrator.cancel();
                }
            }
            SigningView::Approval(request) => {
                println!();
                describe_request(&request);
                let approved = Confirm::new()
                    .with_prompt("Approve?")
                    .default(false)
                    .interact()?;
                if approved {
                    orchestrator.approve();
                } else {
                    orchestrator.cancel();
                }
            }
        }
    }

    let decision = pending.await?;
    match &decision {
        SigningDecision::Cancelled => info!("Signing request cancelled"),
        _ => info!("Signing request approved"),
    }
    println!("{}", serde_json::to_string_pretty(&decision)?);

    Ok(())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    Ok(())
}
