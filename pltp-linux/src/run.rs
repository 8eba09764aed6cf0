//! Session loops for each role. Runs on a blocking thread; returns when the
//! stop flag is raised.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use pltp_core::{Clock, Message, MessageType, PltpError, Role, Session, SystemClock, Watchdog};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::disk::DiskFile;
use crate::inbox::Inbox;
use crate::transport::TcpLink;
use crate::watchdog::Heartbeat;

/// Subdirectory of the outbox that shipped files are moved into.
const SENT_DIR: &str = "sent";

type Link = Session<TcpLink>;

pub fn run(role: Role, cfg: &Config, stop: &AtomicBool, beat: Arc<Heartbeat>) -> anyhow::Result<()> {
    let mut inbox = match role {
        Role::Base => Some(
            Inbox::new(&cfg.inbox)
                .with_context(|| format!("creating inbox {}", cfg.inbox.display()))?,
        ),
        Role::Sensor => {
            fs::create_dir_all(cfg.outbox.join(SENT_DIR))
                .with_context(|| format!("creating outbox {}", cfg.outbox.display()))?;
            None
        }
    };

    if let Some(inbox) = inbox.as_ref() {
        info!(inbox = %inbox.dir().display(), "storing received files");
    }

    let link = TcpLink::new(cfg.listen, cfg.peer).with_dial_timeout(cfg.connect_timeout());
    let mut session = Session::new(role, link)
        .with_config(cfg.session.clone())
        .with_watchdog(beat.clone());
    info!(%role, listen = %cfg.listen, peer = %cfg.peer, "session loop started");

    while !stop.load(Ordering::Relaxed) {
        beat.feed();
        match session.begin(cfg.connect_timeout()) {
            Ok(()) => {
                let outcome = match inbox.as_mut() {
                    Some(inbox) => serve_base(&mut session, inbox, cfg, stop),
                    None => serve_sensor(&mut session, cfg, stop),
                };
                if let Err(e) = outcome {
                    warn!(error = %format!("{e:#}"), "session ended");
                }
                if let Some(inbox) = inbox.as_mut() {
                    inbox.abandon();
                }
                let stats = session.stats();
                info!(
                    sent = stats.frames_sent,
                    received = stats.frames_received,
                    rejected = stats.acks_rejected,
                    corrupt = stats.integrity_errors,
                    "session closed"
                );
            }
            Err(e) => debug!(error = %e, "no peer this round"),
        }
        session.end();
        std::thread::sleep(cfg.session.connect_poll());
    }
    info!("session loop stopped");
    Ok(())
}

/// Receive one message, treating an idle window as "nothing yet".
fn next(session: &mut Link, cfg: &Config) -> Result<Option<Message>, PltpError> {
    match session.receive(cfg.receive_timeout()) {
        Ok(msg) => Ok(Some(msg)),
        Err(PltpError::Timeout) => Ok(None),
        Err(e) => Err(e),
    }
}

fn log_drift(remote: u32) {
    let local = SystemClock::new().epoch_secs() as i64;
    let drift = local - i64::from(remote);
    info!(remote, drift_secs = drift, "peer clock");
}

fn serve_base(
    session: &mut Link,
    inbox: &mut Inbox,
    cfg: &Config,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let epoch = session.send_clock()?;
    info!(epoch, "clock sent");
    while !stop.load(Ordering::Relaxed) {
        let Some(msg) = next(session, cfg)? else {
            continue;
        };
        match msg.kind() {
            MessageType::Time => {
                if let Some(remote) = msg.epoch() {
                    log_drift(remote);
                }
            }
            MessageType::FileInfo | MessageType::FileContent => {
                if let Some(done) = inbox.accept(&msg).context("writing inbox")? {
                    info!(path = %done.path.display(), size = done.size, "file received");
                }
            }
            MessageType::Unknown => debug!(size = msg.size(), "ignoring unknown message"),
        }
    }
    Ok(())
}

fn serve_sensor(session: &mut Link, cfg: &Config, stop: &AtomicBool) -> anyhow::Result<()> {
    // The Base opens every session with its clock.
    while !stop.load(Ordering::Relaxed) {
        match next(session, cfg)? {
            Some(msg) if msg.kind() == MessageType::Time => {
                if let Some(remote) = msg.epoch() {
                    log_drift(remote);
                }
                break;
            }
            Some(msg) => debug!(kind = ?msg.kind(), "message before clock ignored"),
            None => {}
        }
    }

    for path in pending(&cfg.outbox)? {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        ship(session, &cfg.outbox, &path)?;
    }

    while !stop.load(Ordering::Relaxed) {
        if let Some(msg) = next(session, cfg)? {
            match msg.epoch() {
                Some(remote) => log_drift(remote),
                None => debug!(kind = ?msg.kind(), "message ignored"),
            }
        }
    }
    Ok(())
}

/// Regular files waiting in the outbox, oldest name first.
fn pending(outbox: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries =
        fs::read_dir(outbox).with_context(|| format!("listing outbox {}", outbox.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn ship(session: &mut Link, outbox: &Path, path: &Path) -> anyhow::Result<()> {
    let mut file =
        DiskFile::open(path).with_context(|| format!("opening {}", path.display()))?;
    match session.send_file(&mut file) {
        Ok(done) => {
            let dest = sent_path(outbox, &done.name);
            fs::rename(path, &dest)
                .with_context(|| format!("moving {} to {}", path.display(), dest.display()))?;
            info!(name = %done.name, chunks = done.chunks, "file shipped");
            Ok(())
        }
        // Not a link failure; leave the file for someone to look at.
        Err(e) if !e.resets_session() => {
            warn!(path = %path.display(), error = %e, "file skipped");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Place under `sent/` for a shipped file, never replacing an earlier one.
fn sent_path(outbox: &Path, name: &str) -> PathBuf {
    let dir = outbox.join(SENT_DIR);
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    let free = (1..=u32::MAX)
        .map(|n| dir.join(format!("{name}.{n}")))
        .find(|p| !p.exists());
    match free {
        Some(p) => {
            warn!(name, renamed = %p.display(), "already shipped a file by this name");
            p
        }
        None => first,
    }
}
