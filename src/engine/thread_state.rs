use std::sync::{Arc, Mutex};

use var_bitmap::Bitmap;

/// Tracks which fetch workers are idle, so the engine can tell a momentary
/// lull from a finished run and the progress report can show pool
/// utilization.
///
/// Worker ids are numbered from 1. Workers start busy; one only counts as
/// idle once it has polled and found nothing.
#[derive(Clone)]
pub struct ThreadState {
    idle_map: Arc<Mutex<Bitmap>>,
}

pub enum ThreadStatus {
    Idle,
    Busy,
}

impl ThreadState {
    pub fn new(num_threads: usize) -> Self {
        Self {
            idle_map: Arc::new(Mutex::new(Bitmap::with_size(num_threads))),
        }
    }

    pub fn set_thread_status(&self, worker_id: u32, status: ThreadStatus) {
        let mut map = self.idle_map.lock().unwrap();
        let idle = matches!(status, ThreadStatus::Idle);
        map.set((worker_id - 1) as usize, idle);
    }

    /// Number of workers currently idle.
    pub fn idle_workers(&self) -> usize {
        let map = self.idle_map.lock().unwrap();
        (0..map.size()).filter(|&idx| map.get(idx)).count()
    }

    pub fn num_workers(&self) -> usize {
        self.idle_map.lock().unwrap().size()
    }

    pub fn is_all_idle(&self) -> bool {
        let map = self.idle_map.lock().unwrap();
        (0..map.size()).all(|idx| map.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_start_busy() {
        let state = ThreadState::new(3);
        assert_eq!(state.idle_workers(), 0);
        assert!(!state.is_all_idle());
    }

    #[test]
    fn idle_tracking_follows_status_updates() {
        let state = ThreadState::new(2);
        state.set_thread_status(1, ThreadStatus::Idle);
        assert_eq!(state.idle_workers(), 1);
        assert!(!state.is_all_idle());

        state.set_thread_status(2, ThreadStatus::Idle);
        assert!(state.is_all_idle());

        state.set_thread_status(1, ThreadStatus::Busy);
        assert_eq!(state.idle_workers(), 1);
        assert_eq!(state.num_workers(), 2);
    }
}
