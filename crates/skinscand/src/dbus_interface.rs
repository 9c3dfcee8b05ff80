use crate::engine::EngineHandle;
use crate::store::SessionStore;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.skinscan.Scanner1";
pub const OBJECT_PATH: &str = "/org/skinscan/Scanner1";

/// D-Bus interface for the skin scan daemon.
///
/// Bus name: org.skinscan.Scanner1
/// Object path: /org/skinscan/Scanner1
pub struct ScanService {
    engine: EngineHandle,
    store: SessionStore,
}

impl ScanService {
    pub fn new(engine: EngineHandle, store: SessionStore) -> Self {
        Self { engine, store }
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.skinscan.Scanner1")]
impl ScanService {
    /// Begin a scan cycle. Returns the scan id.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        let id = self.engine.start().await.map_err(failed)?;
        Ok(id.to_string())
    }

    /// Stop the camera loop. Returns false if it was not running.
    async fn stop_camera(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop_camera requested");
        self.engine.stop_camera().await.map_err(failed)
    }

    /// Return daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        serde_json::to_string(&status).map_err(failed)
    }

    /// Save the current overlay as PNG. Returns its path.
    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        let path = self.engine.snapshot().await.map_err(failed)?;
        tracing::debug!(path = %path.display(), "overlay snapshot written");
        Ok(path.to_string_lossy().into_owned())
    }

    /// Latest result of this login session as JSON.
    async fn last_result(&self) -> zbus::fdo::Result<String> {
        match self.store.read_result().map_err(failed)? {
            Some(record) => serde_json::to_string(&record).map_err(failed),
            None => Err(zbus::fdo::Error::Failed(
                "no scan has completed in this session".into(),
            )),
        }
    }

    /// Emitted when a scan result becomes visible.
    #[zbus(signal)]
    pub async fn result_ready(emitter: &SignalEmitter<'_>, score: u8) -> zbus::Result<()>;
}
