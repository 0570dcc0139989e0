use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use egui::Context;

/// Runs blocking store calls off the UI thread. Each job sends one event
/// back and wakes the UI; the app drains events once per frame.
pub struct TaskRunner<E> {
    tx: Sender<E>,
    rx: Receiver<E>,
    ctx: Context,
    in_flight: Arc<AtomicUsize>,
}

impl<E: Send + 'static> TaskRunner<E> {
    pub fn new(ctx: Context) -> Self {
        let (tx, rx) = mpsc::channel::<E>();
        Self {
            tx,
            rx,
            ctx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn spawn(&self, label: &'static str, job: impl FnOnce() -> E + Send + 'static) {
        let tx = self.tx.clone();
        let ctx = self.ctx.clone();
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::Relaxed);

        thread::spawn(move || {
            tracing::debug!(task = label, "task started");
            let event = job();
            in_flight.fetch_sub(1, Ordering::Relaxed);
            if tx.send(event).is_err() {
                tracing::debug!(task = label, "app gone, result dropped");
                return;
            }
            ctx.request_repaint();
        });
    }

    pub fn try_recv(&self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Relaxed) > 0
    }
}
