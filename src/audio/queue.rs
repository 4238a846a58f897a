use std::collections::VecDeque;
use tracing::{debug, info};

use crate::error::{PlaybackError, Result};
use crate::sources::Track;

/// Cola FIFO de pistas pendientes de una guild.
///
/// El orden de inserción es el orden de reproducción. La pista en curso no
/// forma parte de la cola: sale de aquí cuando el pipeline la toma.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una pista al final de la cola.
    pub fn push(&mut self, track: Track) -> Result<()> {
        if self.items.len() >= self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", track.title);
        self.items.push_back(track);

        Ok(())
    }

    /// Saca la siguiente pista a reproducir.
    pub fn pop(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Pistas en espera (sin contar la que está sonando).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Descarta todas las pistas pendientes.
    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            debug!("🗑️ Cola vaciada ({} pistas descartadas)", self.items.len());
        }
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(n: u32) -> Track {
        Track::new(format!("https://youtu.be/{}", n), format!("Pista {}", n))
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = TrackQueue::new(10);
        queue.push(track(1)).unwrap();
        queue.push(track(2)).unwrap();
        queue.push(track(3)).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().title, "Pista 1");
        assert_eq!(queue.pop().unwrap().title, "Pista 2");
        assert_eq!(queue.pop().unwrap().title, "Pista 3");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_rejects_when_full() {
        let mut queue = TrackQueue::new(2);
        queue.push(track(1)).unwrap();
        queue.push(track(2)).unwrap();

        let result = queue.push(track(3));
        assert!(matches!(result, Err(PlaybackError::QueueFull(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut queue = TrackQueue::new(10);
        queue.push(track(1)).unwrap();
        queue.push(track(2)).unwrap();

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);

        // clear sobre cola vacía es inofensivo
        queue.clear();
        assert!(queue.is_empty());
    }
}
