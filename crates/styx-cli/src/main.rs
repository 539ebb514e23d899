mod file_log;
mod paths;

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use styx_crypto::{CryptoError, PrekeyManager, X25519};
use styx_inbox::{
    plaintext_body, prepare_records, submit_records, InboxScanner, OutboundMessage, OutgoingRecord,
    ScanRequest, StyxConfig, UndecodedReason,
};
use styx_proto::{
    decode_frame, decode_narrow, encode_frame, message_id, rail::NARROW_PREFIX, Envelope,
    EnvelopeKind, RailPreference, WideRecord,
};
use styx_store::{load_prekey_state, save_prekey_state, KeyValueStore, SqliteStore};
use tracing_subscriber::EnvFilter;

use crate::file_log::FileLog;

#[derive(Parser)]
#[command(name = "styx")]
#[command(about = "Styx protocol keys, records and inbox scans", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON config file (defaults to <data-dir>/styx.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an identity and a full prekey pool
    Init {
        #[arg(long)]
        owner: String,
        /// Replace existing key material
        #[arg(long)]
        force: bool,
    },

    /// Print the publishable prekey bundle
    Bundle {
        #[arg(long)]
        owner: String,
    },

    /// Rotate the signed prekey and refill one-time prekeys when due
    Maintain {
        #[arg(long)]
        owner: String,
        /// Evaluate staleness at this RFC 3339 time instead of now
        #[arg(long)]
        now: Option<String>,
    },

    /// Build transport records for a plaintext message
    Encode(EncodeArgs),

    /// Decode one record (narrow text or wide hex)
    Decode { record: String },

    /// Run the inbox pipeline over a JSON transport log
    Scan {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        log: PathBuf,
    },
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(long, default_value = "message")]
    kind: String,
    #[arg(long)]
    text: String,
    #[arg(long, default_value = "text/plain")]
    content_type: String,
    /// auto, narrow, wide or wide-strict
    #[arg(long, default_value = "auto")]
    rail: String,
    /// Treat the wide rail facility as available
    #[arg(long)]
    wide_available: bool,
    #[arg(long, default_value = "512")]
    max_chunk: usize,
    /// Append the records to this JSON transport log
    #[arg(long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::default_data_dir()?,
    };
    let config = load_config(cli.config.as_deref(), &data_dir)?;

    match cli.command {
        Commands::Init { owner, force } => init_command(&data_dir, &config, &owner, force).await,
        Commands::Bundle { owner } => bundle_command(&data_dir, &owner).await,
        Commands::Maintain { owner, now } => maintain_command(&data_dir, &config, &owner, now).await,
        Commands::Encode(args) => encode_command(&config, args).await,
        Commands::Decode { record } => decode_command(&record),
        Commands::Scan { owner, log } => scan_command(&data_dir, &config, &owner, &log).await,
    }
}

fn load_config(explicit: Option<&Path>, data_dir: &Path) -> Result<StyxConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = paths::config_path(data_dir);
            if !path.exists() {
                return Ok(StyxConfig::default());
            }
            path
        }
    };
    StyxConfig::load(&path).with_context(|| format!("loading config {}", path.display()))
}

async fn open_store(data_dir: &Path) -> Result<SqliteStore> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db = paths::database_path(data_dir);
    SqliteStore::open(&db).await.with_context(|| format!("opening {}", db.display()))
}

async fn load_manager(store: &SqliteStore, config: &StyxConfig, owner: &str) -> Result<PrekeyManager> {
    let state = load_prekey_state(store, owner)
        .await?
        .ok_or_else(|| anyhow!("no keys for {owner}; run `styx init --owner {owner}` first"))?;
    Ok(PrekeyManager::from_state(Arc::new(X25519), config.prekeys.clone(), state))
}

async fn init_command(data_dir: &Path, config: &StyxConfig, owner: &str, force: bool) -> Result<()> {
    let store = open_store(data_dir).await?;
    if !force && load_prekey_state(&store, owner).await?.is_some() {
        bail!("keys for {owner} already exist; pass --force to replace them");
    }
    let manager = PrekeyManager::generate(Arc::new(X25519), config.prekeys.clone())?;
    let state = manager.snapshot();
    save_prekey_state(&store, owner, &state).await?;

    tracing::info!(target: "styx_cli", event = "identity_created", owner);
    let out = json!({
        "owner": owner,
        "identity_fingerprint": state.identity.exchange_public().fingerprint(),
        "signing_fingerprint": state.identity.signing_public.fingerprint(),
        "one_time_prekeys": manager.one_time_prekey_count(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn bundle_command(data_dir: &Path, owner: &str) -> Result<()> {
    let store = open_store(data_dir).await?;
    let state = load_prekey_state(&store, owner)
        .await?
        .ok_or_else(|| anyhow!("no keys for {owner}"))?;
    let bundle = state.bundle();
    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

async fn maintain_command(
    data_dir: &Path,
    config: &StyxConfig,
    owner: &str,
    now: Option<String>,
) -> Result<()> {
    let now: DateTime<Utc> = match now {
        Some(text) => DateTime::parse_from_rfc3339(&text)
            .with_context(|| format!("parsing --now {text:?}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let store = open_store(data_dir).await?;
    let manager = load_manager(&store, config, owner).await?;

    let due = manager.needs_refresh_at(now);
    let changed = manager.maintain_at(now)?;
    if changed {
        save_prekey_state(&store, owner, &manager.snapshot()).await?;
    }
    let out = json!({
        "owner": owner,
        "refresh_due": due,
        "bundle_changed": changed,
        "one_time_prekeys": manager.one_time_prekey_count(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn encode_command(config: &StyxConfig, args: EncodeArgs) -> Result<()> {
    let kind: EnvelopeKind = args.kind.parse()?;
    let mut message = OutboundMessage::new(kind, &args.content_type, args.max_chunk);
    message.preference = args.rail.parse::<RailPreference>()?;

    // Bodies are not encrypted here; sealing belongs to the session layer.
    let seal = |pt: &[u8]| -> Result<Vec<u8>, CryptoError> { Ok(pt.to_vec()) };
    let wide_available = args.wide_available;
    let probe = move || wide_available;
    let records = prepare_records(args.text.as_bytes(), &message, &seal, &probe, &config.rails)?;

    for record in &records {
        match record {
            OutgoingRecord::Narrow(text) => println!("{text}"),
            OutgoingRecord::Wide(bytes) => println!("{}", hex::encode(bytes)),
        }
    }

    if let Some(path) = args.log {
        let log = FileLog::new(path, config.rails.clone());
        let ids = submit_records(&log, &records, &config.retry).await?;
        tracing::info!(
            target: "styx_cli",
            event = "records_submitted",
            count = ids.len(),
            log = %log.path().display()
        );
    }
    Ok(())
}

fn body_json(bytes: &[u8]) -> serde_json::Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => json!({ "text": text }),
        Err(_) => json!({ "base64url": URL_SAFE_NO_PAD.encode(bytes) }),
    }
}

fn decode_command(record: &str) -> Result<()> {
    let record = record.trim();
    let (rail, recipient, envelope_bytes) = if record.starts_with(NARROW_PREFIX) {
        ("narrow", None, decode_narrow(record)?)
    } else {
        let raw = hex::decode(record).context("record is neither narrow text nor wide hex")?;
        let wide = WideRecord::decode(&raw)?;
        ("wide", wide.recipient.map(hex::encode), wide.payload)
    };
    let envelope = Envelope::decode(&envelope_bytes)?;

    let mut out = json!({
        "rail": rail,
        "recipient": recipient,
        "message_id": message_id(&envelope_bytes),
        "version": envelope.version,
        "kind": envelope.kind.as_str(),
        "header": body_json(&envelope.header),
        "body": body_json(&envelope.body),
    });
    if let Some(frame) = std::str::from_utf8(&envelope.body).ok().and_then(decode_frame) {
        out["chunk"] = json!({
            "msg_id": frame.msg_id(),
            "index": frame.index(),
            "total": frame.total(),
            "content_type": frame.content_type(),
            "bytes": body_json(frame.bytes()),
        });
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn pending_key(owner: &str) -> String {
    format!("styx.pending.{owner}")
}

async fn scan_command(data_dir: &Path, config: &StyxConfig, owner: &str, log: &Path) -> Result<()> {
    let store = Arc::new(open_store(data_dir).await?);

    let pending: Vec<String> = match store.get(&pending_key(owner)).await? {
        Some(bytes) => serde_json::from_slice(&bytes).context("reading pending frames")?,
        None => Vec::new(),
    };
    let pending_frames = pending.iter().filter_map(|text| decode_frame(text)).collect();

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let transport = Arc::new(FileLog::new(log, config.inbox.rails.clone()));
    let scanner = InboxScanner::new(transport, config.inbox.clone())
        .with_store(store.clone())
        .with_retry(config.retry.clone());
    let request = ScanRequest::new(owner)
        .with_pending_frames(pending_frames)
        .with_cancel(cancel);
    let report = scanner.scan(request, &plaintext_body).await?;

    let pending: Vec<String> = report.pending_frames.iter().map(encode_frame).collect();
    if pending.is_empty() {
        store.delete(&pending_key(owner)).await?;
    } else {
        store.put(&pending_key(owner), &serde_json::to_vec(&pending)?).await?;
    }

    let out = json!({
        "owner": owner,
        "cursor": report.cursor,
        "cancelled": report.cancelled,
        "fetched": report.fetched,
        "duplicates": report.duplicates,
        "ignored": report.ignored,
        "pending_frames": pending.len(),
        "dropped_frames": report.dropped_frames,
        "assembled": report.assembled.iter().map(|m| json!({
            "msg_id": m.msg_id,
            "content_type": m.content_type,
            "body": body_json(&m.bytes),
        })).collect::<Vec<_>>(),
        "plain": report.plain.iter().map(|m| json!({
            "record": m.record.signature,
            "slot": m.record.slot,
            "rail": m.record.rail.as_str(),
            "kind": m.record.envelope.as_ref().map(|e| e.kind.as_str()),
            "body": body_json(&m.plaintext),
        })).collect::<Vec<_>>(),
        "undecoded": report.undecoded.iter().map(|u| json!({
            "record": u.record.signature,
            "reason": match &u.reason {
                UndecodedReason::MalformedRecord(e) => format!("malformed record: {e}"),
                UndecodedReason::MalformedEnvelope(e) => format!("malformed envelope: {e}"),
                UndecodedReason::DecryptFailed => "decrypt failed".to_string(),
            },
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
