//! Matchmaking queue - pairs two waiting players
//!
//! A bounded FIFO of capacity two with an explicit lifecycle. The second
//! enqueue seals the queue (`Done`) against further enqueues; draining the last
//! player leaves it `Done` and empty, and a fresh queue is needed for the next
//! pairing. Callers serialize access (the server keeps it behind one mutex).

use std::collections::VecDeque;

use thiserror::Error;

/// Players needed to start a match
pub const QUEUE_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    Open,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue is empty")]
    Empty,
    /// Drained after pairing; build a new queue
    #[error("queue is consumed")]
    Sealed,
}

#[derive(Debug, Clone)]
pub struct PlayersQueue<T> {
    waiting: VecDeque<T>,
    state: QueueState,
}

impl<T> PlayersQueue<T> {
    pub fn new() -> Self {
        Self {
            waiting: VecDeque::with_capacity(QUEUE_CAPACITY),
            state: QueueState::Open,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Add a player. Returns false (and drops nothing from the queue) when
    /// the queue is full or sealed.
    pub fn enqueue(&mut self, player: T) -> bool {
        if self.state == QueueState::Done || self.waiting.len() >= QUEUE_CAPACITY {
            return false;
        }
        self.waiting.push_back(player);
        if self.waiting.len() == QUEUE_CAPACITY {
            self.state = QueueState::Done;
        }
        true
    }

    /// Take the head of the queue
    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        let Some(head) = self.waiting.pop_front() else {
            return Err(match self.state {
                QueueState::Open => QueueError::Empty,
                QueueState::Done => QueueError::Sealed,
            });
        };
        self.state = if self.waiting.is_empty() {
            QueueState::Done
        } else {
            QueueState::Open
        };
        Ok(head)
    }

    /// Exactly one player is waiting for an opponent
    pub fn has_spot(&self) -> bool {
        self.state == QueueState::Open && self.waiting.len() == 1
    }

    pub fn is_done(&self) -> bool {
        self.state == QueueState::Done
    }

    pub fn is_full(&self) -> bool {
        self.waiting.len() >= QUEUE_CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.waiting.iter()
    }

    /// Drop a waiting player that matches `pred` (e.g. a disconnected seeker)
    pub fn remove_where(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        if self.state == QueueState::Done {
            return None;
        }
        let index = self.waiting.iter().position(pred)?;
        self.waiting.remove(index)
    }
}

impl<T> Default for PlayersQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
