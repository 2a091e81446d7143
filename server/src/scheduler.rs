use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Qué tipo de limpieza diferida está pendiente para un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupKind {
    /// Borrar sólo `uploadDir` (el artefacto sigue descargable).
    Uploads,
    /// Sacar el registro y los dos directorios.
    Expire,
}

type Key = (String, CleanupKind);

/// Acciones one-shot diferidas, en memoria (se pierden al reiniciar).
///
/// Cada acción es un task de tokio que duerme y después corre; se puede
/// cancelar por job o todas juntas al apagar el servidor. Como usa
/// `tokio::time`, los tests lo manejan con el reloj pausado de tokio.
#[derive(Clone, Default)]
pub struct CleanupScheduler {
    pending: Arc<Mutex<HashMap<Key, JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl CleanupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Programa `action` para dentro de `delay`. Si ya había una del mismo
    /// tipo para ese job, la reemplaza.
    pub fn schedule<F>(&self, job_id: &str, kind: CleanupKind, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key: Key = (job_id.to_string(), kind);
        let token = self.shutdown.clone();
        let pending = self.pending.clone();
        let task_key = key.clone();

        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("limpieza {:?} de job {} cancelada por shutdown", task_key.1, task_key.0);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            // se saca del mapa antes de correr para que cancel() ya no la aborte
            pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_key);
            action.await;
        });

        if let Some(previous) = map.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancela todas las acciones pendientes de un job.
    pub fn cancel(&self, job_id: &str) {
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|(id, _), handle| {
            if id == job_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn is_pending(&self, job_id: &str, kind: CleanupKind) -> bool {
        let map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        map.contains_key(&(job_id.to_string(), kind))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Cancela todo lo pendiente (shutdown del proceso).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in map.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let make = move || {
            let h = h.clone();
            Box::pin(async move {
                h.fetch_add(1, Ordering::SeqCst);
            }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        };
        (hits, make)
    }

    #[tokio::test(start_paused = true)]
    async fn corre_una_vez_despues_del_delay() {
        let sched = CleanupScheduler::new();
        let (hits, make) = counter();

        sched.schedule("j1", CleanupKind::Uploads, Duration::from_secs(3600), make());
        assert!(sched.is_pending("j1", CleanupKind::Uploads));

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!sched.is_pending("j1", CleanupKind::Uploads));

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_evita_la_accion() {
        let sched = CleanupScheduler::new();
        let (hits, make) = counter();

        sched.schedule("j1", CleanupKind::Uploads, Duration::from_secs(10), make());
        sched.schedule("j1", CleanupKind::Expire, Duration::from_secs(20), make());
        sched.schedule("j2", CleanupKind::Uploads, Duration::from_secs(10), make());
        sched.cancel("j1");
        assert_eq!(sched.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reprogramar_reemplaza_la_anterior() {
        let sched = CleanupScheduler::new();
        let (hits, make) = counter();

        sched.schedule("j1", CleanupKind::Expire, Duration::from_secs(10), make());
        sched.schedule("j1", CleanupKind::Expire, Duration::from_secs(100), make());

        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(51)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancela_todo() {
        let sched = CleanupScheduler::new();
        let (hits, make) = counter();

        sched.schedule("j1", CleanupKind::Uploads, Duration::from_secs(10), make());
        sched.schedule("j2", CleanupKind::Uploads, Duration::from_secs(10), make());
        sched.shutdown();
        assert_eq!(sched.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
