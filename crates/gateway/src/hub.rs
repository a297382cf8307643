use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mailbox::{ChannelDirectory, Namespace, ShmDirectory};
use relay::{ModuleReader, PostUpdate, RelayError, TunerUpdate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tuners::{Tuner, TunerValue};

/// One relay message, already rendered to JSON, tagged with the module it
/// belongs to so socket handlers can filter their subscription.
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub module: String,
    pub payload: String,
}

#[derive(Serialize)]
struct PostMessage<'a> {
    image_name: &'a str,
    image_index: usize,
    width: u64,
    height: u64,
    depth: u64,
    elem_width: u64,
    acquired_at_ms: u64,
    data: String,
}

#[derive(Serialize)]
struct TunerMessage<'a> {
    option_name: &'a str,
    option_index: usize,
    #[serde(rename = "type")]
    kind: &'a str,
    value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_value: Option<serde_json::Value>,
}

fn post_payload(update: &PostUpdate<'_>) -> Option<String> {
    let message = PostMessage {
        image_name: update.name,
        image_index: update.index,
        width: update.shape.width,
        height: update.shape.height,
        depth: update.shape.depth,
        elem_width: update.shape.elem_width,
        acquired_at_ms: update.acquired_at_ms,
        data: BASE64.encode(update.data),
    };
    serde_json::to_string(&message).ok()
}

fn tuner_payload(update: &TunerUpdate<'_>) -> Option<String> {
    let message = match update.tuner {
        Tuner::Int(t) => TunerMessage {
            option_name: t.name(),
            option_index: update.index,
            kind: "int",
            value: t.current().into(),
            min_value: Some(t.min().into()),
            max_value: Some(t.max().into()),
        },
        Tuner::Real(t) => TunerMessage {
            option_name: t.name(),
            option_index: update.index,
            kind: "real",
            value: t.current().into(),
            min_value: Some(t.min().into()),
            max_value: Some(t.max().into()),
        },
        Tuner::Bool(t) => TunerMessage {
            option_name: t.name(),
            option_index: update.index,
            kind: "bool",
            value: t.current().into(),
            min_value: None,
            max_value: None,
        },
    };
    serde_json::to_string(&message).ok()
}

/// Owns one [`ModuleReader`] per watched module and bridges its callbacks
/// into a broadcast channel the WebSocket handlers subscribe to. Readers
/// that die because their module went away are re-attached by a periodic
/// refresh pass, invisibly to connected listeners.
pub struct RelayHub {
    ns: Namespace,
    directory: ShmDirectory,
    poll_hz: f64,
    readers: Mutex<HashMap<String, ModuleReader>>,
    tx: broadcast::Sender<ModuleEvent>,
}

fn lock_readers(hub: &RelayHub) -> MutexGuard<'_, HashMap<String, ModuleReader>> {
    hub.readers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RelayHub {
    pub fn new(ns: Namespace, poll_hz: f64) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            directory: ShmDirectory::new(ns.clone()),
            ns,
            poll_hz,
            readers: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.tx.subscribe()
    }

    pub fn active_modules(&self) -> Vec<String> {
        self.directory.active_modules().unwrap_or_default()
    }

    /// Make sure a live reader exists for `module`, attaching (or replacing
    /// a dead one) if needed.
    pub fn ensure_module(&self, module: &str) -> Result<(), RelayError> {
        {
            let readers = lock_readers(self);
            if let Some(reader) = readers.get(module)
                && !reader.is_dead()
            {
                return Ok(());
            }
        }
        self.refresh_module(module)
    }

    /// Discard any existing reader for `module` and attach a fresh one.
    pub fn refresh_module(&self, module: &str) -> Result<(), RelayError> {
        let mut readers = lock_readers(self);
        if let Some(mut stale) = readers.remove(module) {
            stale.shutdown();
        }

        let mut reader = ModuleReader::attach(&self.ns, &self.directory, module)?;

        let tx = self.tx.clone();
        reader.on_post(move |update| {
            if let Some(payload) = post_payload(update) {
                let _ = tx.send(ModuleEvent {
                    module: update.module.to_string(),
                    payload,
                });
            }
        });

        let tx = self.tx.clone();
        reader.on_tuner(move |update| {
            if let Some(payload) = tuner_payload(update) {
                let _ = tx.send(ModuleEvent {
                    module: update.module.to_string(),
                    payload,
                });
            }
        });

        reader.run_forever(self.poll_hz)?;
        tracing::info!("relaying module '{}'", module);
        readers.insert(module.to_string(), reader);
        Ok(())
    }

    /// Re-attach every dead reader whose module has come back. Dead readers
    /// whose module is still absent are left in place to retry next pass.
    pub fn refresh_dead(&self) {
        let active = self.active_modules();
        let stale: Vec<String> = {
            let readers = lock_readers(self);
            readers
                .iter()
                .filter(|(name, reader)| reader.is_dead() && active.contains(name))
                .map(|(name, _)| name.clone())
                .collect()
        };
        for module in stale {
            if let Err(e) = self.refresh_module(&module) {
                tracing::warn!("failed to re-attach module '{}': {}", module, e);
            }
        }
    }

    /// Force the next poll pass of `module` to re-emit all control values,
    /// so a listener that just joined gets full initial state.
    pub fn resend_tuners(&self, module: &str) {
        let readers = lock_readers(self);
        if let Some(reader) = readers.get(module) {
            reader.allow_resend_tuners_once();
        }
    }

    /// Apply a listener's control update. JSON carries no variant
    /// information, so numbers are tried as the integer variant first and
    /// the real variant second.
    pub fn update_tuner(
        &self,
        module: &str,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), RelayError> {
        let readers = lock_readers(self);
        let reader = readers
            .get(module)
            .ok_or_else(|| RelayError::ModuleNotActive(module.to_string()))?;

        match value {
            serde_json::Value::Bool(b) => reader.update_tuner_value(name, TunerValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64()
                    && i32::try_from(i).is_ok()
                    && reader
                        .update_tuner_value(name, TunerValue::Int(i as i32))
                        .is_ok()
                {
                    return Ok(());
                }
                match n.as_f64() {
                    Some(f) => reader.update_tuner_value(name, TunerValue::Real(f)),
                    None => Err(RelayError::RejectedValue(name.to_string())),
                }
            }
            _ => Err(RelayError::RejectedValue(name.to_string())),
        }
    }

    /// Stop and join every reader. Called on shutdown so no reader is ever
    /// dropped with its poll loop still running.
    pub fn shutdown(&self) {
        let mut readers = lock_readers(self);
        for (module, mut reader) in readers.drain() {
            tracing::info!("detaching from module '{}'", module);
            reader.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailbox::FrameShape;
    use processing::ModuleManager;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn hub_relays_posts_and_survives_module_restart() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut manager = ModuleManager::new(
            "gate",
            ns.clone(),
            vec![],
            vec![Tuner::int("gain", 5, 0, 100).unwrap()],
        )
        .unwrap();
        let mut session = manager.session().unwrap();
        session
            .post("edges", 7, FrameShape::bytes(3).unwrap(), &[1, 2, 3])
            .unwrap();

        let hub = RelayHub::new(ns, 200.0);
        let mut rx = hub.subscribe();
        hub.ensure_module("gate").unwrap();

        // Initial state flows: one post and one tuner message.
        let mut kinds = Vec::new();
        for _ in 0..2 {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            let event = loop {
                match rx.try_recv() {
                    Ok(event) => break event,
                    Err(_) => {
                        assert!(std::time::Instant::now() < deadline, "no relay event");
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            };
            assert_eq!(event.module, "gate");
            let value: serde_json::Value = serde_json::from_str(&event.payload).unwrap();
            kinds.push(
                value
                    .get("image_name")
                    .map(|_| "post")
                    .unwrap_or("tuner")
                    .to_string(),
            );
        }
        kinds.sort();
        assert_eq!(kinds, vec!["post", "tuner"]);

        // Module goes away; the hub notices and re-attaches once it is back.
        drop(session);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            hub.refresh_dead();
            let dead = {
                let readers = lock_readers(&hub);
                readers.get("gate").is_some_and(|r| r.is_dead())
            };
            if dead {
                break;
            }
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }

        let _session = manager.session().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            hub.refresh_dead();
            let alive = {
                let readers = lock_readers(&hub);
                readers.get("gate").is_some_and(|r| !r.is_dead())
            };
            if alive {
                break;
            }
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }

        hub.shutdown();
    }
}
