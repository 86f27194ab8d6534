//! Session driver: run one capture, emit its record, stop the loop.

use std::error::Error;

use rdpshot_core::{
    CaptureRecord, CaptureSession, CaptureTarget, Connector, ImageFormat, LoopControl, Outcome,
    SessionRegistry, SessionSettings, materialize,
};
use tracing::{debug, info};

use crate::output::OutputSink;

pub struct Driver<C> {
    connector: C,
    sink: OutputSink,
    settings: SessionSettings,
    format: ImageFormat,
    registry: SessionRegistry,
}

impl<C: Connector> Driver<C> {
    pub fn new(connector: C, sink: OutputSink, settings: SessionSettings, format: ImageFormat) -> Self {
        Self {
            connector,
            sink,
            settings,
            format,
            registry: SessionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Capture `target` and emit exactly one record for it.
    pub async fn run(&mut self, target: CaptureTarget) -> Result<CaptureRecord, Box<dyn Error>> {
        let id = self.registry.register();
        debug!(%id, %target, "driving capture");

        let result = CaptureSession::new(target.clone(), self.settings.clone())?
            .run(&mut self.connector)
            .await;
        let record = materialize(&result, &target, self.format);
        let emitted = self.sink.emit(&record);

        let outcome = Outcome {
            ip: target.ip(),
            port: target.port(),
            success: record.is_success(),
            summary: result.summary(),
        };
        if self.registry.terminate(id, outcome)? == LoopControl::Stop {
            info!("no sessions left, stopping");
        }
        emitted?;
        Ok(record)
    }
}
