//! Background-execution session bookkeeping.
//!
//! The platform hands out tokens that keep the process alive after it leaves
//! the foreground. One token is kept as the master for the life of the
//! tracking session; later requests open auxiliary tokens, of which only the
//! newest is kept so the execution budget keeps getting renewed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque background-session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called by the platform when it force-expires a token
pub type ExpirationHandler = Box<dyn FnOnce(TokenId) + Send + 'static>;

/// Platform background-execution service
pub trait BackgroundExecution: Send + Sync {
    /// Open a session. `on_expire` may fire at any later time, from any thread.
    fn begin_session(&self, on_expire: ExpirationHandler) -> TokenId;

    fn end_session(&self, token: TokenId);
}

#[derive(Debug, Default)]
struct SessionBook {
    master: Option<TokenId>,
    auxiliary: Vec<TokenId>,
}

/// Tracks the master token and the auxiliary queue.
///
/// Cloning shares the same bookkeeping. Platform calls are made without the
/// lock held so an expiration handler can run re-entrantly.
#[derive(Clone)]
pub struct BackgroundSessionManager {
    platform: Arc<dyn BackgroundExecution>,
    book: Arc<Mutex<SessionBook>>,
}

impl BackgroundSessionManager {
    pub fn new(platform: Arc<dyn BackgroundExecution>) -> Self {
        BackgroundSessionManager {
            platform,
            book: Arc::new(Mutex::new(SessionBook::default())),
        }
    }

    fn book(&self) -> MutexGuard<'_, SessionBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new session. The first becomes the master; later ones are
    /// queued as auxiliary and every older auxiliary token is released.
    pub fn begin(&self) -> TokenId {
        let handler = self.expiration_handler();
        let token = self.platform.begin_session(handler);

        let became_master = {
            let mut book = self.book();
            if book.master.is_none() {
                book.master = Some(token);
                true
            } else {
                book.auxiliary.push(token);
                false
            }
        };

        if became_master {
            log::info!("started master background session {}", token);
        } else {
            log::info!("started background session {}", token);
            self.drain(false);
        }

        token
    }

    /// Release every auxiliary token except the newest
    pub fn end_auxiliary(&self) {
        self.drain(false);
    }

    /// Release every token including the master
    pub fn end_all(&self) {
        self.drain(true);
    }

    /// Forget and release a token the platform expired. Other tokens are
    /// left alone; unknown tokens are still released.
    pub fn expire(&self, token: TokenId) {
        expire_token(&self.book, self.platform.as_ref(), token);
    }

    pub fn master(&self) -> Option<TokenId> {
        self.book().master
    }

    pub fn auxiliary(&self) -> Vec<TokenId> {
        self.book().auxiliary.clone()
    }

    pub fn is_active(&self) -> bool {
        let book = self.book();
        book.master.is_some() || !book.auxiliary.is_empty()
    }

    fn drain(&self, all: bool) {
        let (released, master) = {
            let mut book = self.book();
            let keep = if all { 0 } else { 1 };
            let count = book.auxiliary.len().saturating_sub(keep);
            let released: Vec<TokenId> = book.auxiliary.drain(..count).collect();
            let master = if all { book.master.take() } else { None };
            (released, master)
        };

        for token in released {
            log::debug!("ending background session {}", token);
            self.platform.end_session(token);
        }

        if all {
            if let Some(master) = master {
                log::info!("ending master background session {}", master);
                self.platform.end_session(master);
            }
            log::info!("no more background sessions running");
        } else if let Some(master) = self.master() {
            log::debug!("kept master background session {}", master);
        }
    }

    fn expiration_handler(&self) -> ExpirationHandler {
        let book = Arc::clone(&self.book);
        let platform = Arc::clone(&self.platform);
        Box::new(move |token| expire_token(&book, platform.as_ref(), token))
    }
}

fn expire_token(book: &Mutex<SessionBook>, platform: &dyn BackgroundExecution, token: TokenId) {
    {
        let mut book = book.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if book.master == Some(token) {
            book.master = None;
        }
        book.auxiliary.retain(|t| *t != token);
    }
    log::warn!("background session {} expired", token);
    platform.end_session(token);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Records every call and lets a test fire expiration handlers by hand
    #[derive(Default)]
    pub(crate) struct FakeBackground {
        next_id: Mutex<u64>,
        pub(crate) begun: Mutex<Vec<TokenId>>,
        pub(crate) ended: Mutex<Vec<TokenId>>,
        handlers: Mutex<HashMap<TokenId, ExpirationHandler>>,
    }

    impl FakeBackground {
        pub(crate) fn fire_expiration(&self, token: TokenId) {
            let handler = self.handlers.lock().unwrap().remove(&token);
            if let Some(handler) = handler {
                handler(token);
            }
        }

        pub(crate) fn ended(&self) -> Vec<TokenId> {
            self.ended.lock().unwrap().clone()
        }

        pub(crate) fn begun(&self) -> Vec<TokenId> {
            self.begun.lock().unwrap().clone()
        }
    }

    impl BackgroundExecution for FakeBackground {
        fn begin_session(&self, on_expire: ExpirationHandler) -> TokenId {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let token = TokenId(*next);
            self.begun.lock().unwrap().push(token);
            self.handlers.lock().unwrap().insert(token, on_expire);
            token
        }

        fn end_session(&self, token: TokenId) {
            self.handlers.lock().unwrap().remove(&token);
            self.ended.lock().unwrap().push(token);
        }
    }

    fn manager() -> (Arc<FakeBackground>, BackgroundSessionManager) {
        let platform = Arc::new(FakeBackground::default());
        let manager = BackgroundSessionManager::new(platform.clone());
        (platform, manager)
    }

    #[test]
    fn test_first_begin_is_master() {
        let (platform, manager) = manager();
        assert!(!manager.is_active());

        let token = manager.begin();

        assert_eq!(manager.master(), Some(token));
        assert!(manager.auxiliary().is_empty());
        assert!(manager.is_active());
        assert!(platform.ended().is_empty());
    }

    #[test]
    fn test_three_begins_keep_newest_auxiliary() {
        let (platform, manager) = manager();

        let t1 = manager.begin();
        let t2 = manager.begin();
        let t3 = manager.begin();

        // One master, two auxiliary tokens acquired, older one released
        assert_eq!(platform.begun(), vec![t1, t2, t3]);
        assert_eq!(manager.master(), Some(t1));
        assert_eq!(manager.auxiliary(), vec![t3]);
        assert_eq!(platform.ended(), vec![t2]);
    }

    #[test]
    fn test_end_all_releases_everything() {
        let (platform, manager) = manager();
        let t1 = manager.begin();
        let t2 = manager.begin();

        manager.end_all();

        assert_eq!(manager.master(), None);
        assert!(manager.auxiliary().is_empty());
        assert!(!manager.is_active());
        assert_eq!(platform.ended(), vec![t2, t1]);

        // A fresh begin after end_all starts a new master
        let t3 = manager.begin();
        assert_eq!(manager.master(), Some(t3));
    }

    #[test]
    fn test_end_auxiliary_keeps_master_and_newest() {
        let (platform, manager) = manager();
        let t1 = manager.begin();
        let t2 = manager.begin();

        manager.end_auxiliary();

        assert_eq!(manager.master(), Some(t1));
        assert_eq!(manager.auxiliary(), vec![t2]);
        assert!(platform.ended().is_empty());
    }

    #[test]
    fn test_expiring_auxiliary_leaves_master() {
        let (platform, manager) = manager();
        let t1 = manager.begin();
        let t2 = manager.begin();

        platform.fire_expiration(t2);

        assert_eq!(manager.master(), Some(t1));
        assert!(manager.auxiliary().is_empty());
        assert_eq!(platform.ended(), vec![t2]);
    }

    #[test]
    fn test_expiring_one_of_several_auxiliaries() {
        let (platform, manager) = manager();
        let t1 = manager.begin();

        // Queue two auxiliaries directly so both are tracked at once
        let t2 = platform.begin_session(manager.expiration_handler());
        let t3 = platform.begin_session(manager.expiration_handler());
        manager.book().auxiliary.extend([t2, t3]);

        manager.expire(t2);

        assert_eq!(manager.master(), Some(t1));
        assert_eq!(manager.auxiliary(), vec![t3]);
        assert_eq!(platform.ended(), vec![t2]);
    }

    #[test]
    fn test_expiring_master() {
        let (platform, manager) = manager();
        let t1 = manager.begin();
        let t2 = manager.begin();

        platform.fire_expiration(t1);

        assert_eq!(manager.master(), None);
        assert_eq!(manager.auxiliary(), vec![t2]);
        assert!(manager.is_active());

        // Next begin takes the free master slot
        let t3 = manager.begin();
        assert_eq!(manager.master(), Some(t3));
        assert_eq!(manager.auxiliary(), vec![t2]);
    }
}
