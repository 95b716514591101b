use crate::errors::CameraError;
use crate::hub::FrameHub;
use crate::platform::CaptureSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Handle to the thread that moves frames from the capture source into the
/// hub.
///
/// The pump ends when the source reaches end-of-stream, when [`stop`] is
/// called, or when the source reports an error. In every case it closes the
/// source and then the hub, so all subscribers see end-of-stream.
///
/// [`stop`]: PumpHandle::stop
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    done: Option<oneshot::Receiver<Result<(), CameraError>>>,
    thread: Option<JoinHandle<()>>,
}

impl PumpHandle {
    pub(crate) fn spawn(hub: FrameHub, source: Arc<CaptureSource>) -> Result<Self, CameraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("gameview-capture-pump".to_string())
            .spawn(move || {
                let result = run(&hub, &source, &stop_flag);
                let _ = tx.send(result);
            })
            .map_err(|e| CameraError::StreamError(format!("failed to spawn capture pump: {e}")))?;

        Ok(Self {
            stop,
            done: Some(rx),
            thread: Some(thread),
        })
    }

    /// Ask the pump to finish after the frame it is currently reading.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the pump to end and return its outcome.
    ///
    /// An `Err` means the capture source failed and the process has no frames
    /// left to serve. Cancel safe; once the outcome has been returned, later
    /// calls return `Ok(())`.
    pub async fn wait(&mut self) -> Result<(), CameraError> {
        let result = match self.done.as_mut() {
            Some(rx) => match rx.await {
                Ok(result) => result,
                Err(_) => Err(CameraError::StreamError(
                    "capture pump exited without reporting".to_string(),
                )),
            },
            None => return Ok(()),
        };
        self.done = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(hub: &FrameHub, source: &CaptureSource, stop: &AtomicBool) -> Result<(), CameraError> {
    log::info!("Capture pump started");
    let result = loop {
        if stop.load(Ordering::Relaxed) {
            log::info!("Capture pump stopping");
            break Ok(());
        }
        match source.next_frame() {
            Ok(Some(frame)) => {
                hub.publish(frame);
            }
            Ok(None) => {
                log::info!("Capture source reached end of stream");
                break Ok(());
            }
            Err(e) => {
                log::error!("Capture pump failed: {}", e);
                break Err(e);
            }
        }
    };

    source.close();
    hub.close();
    result
}
