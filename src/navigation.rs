//! SPA navigation observation
//!
//! Single-page apps change the URL through `history.pushState` and
//! `history.replaceState` without a page load. Hosts report those calls
//! through a [`NavigationObserver`]; [`History`] is an in-memory one.

use serde::{Deserialize, Serialize};

/// Which history method was called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationKind {
    Push,
    Replace,
}

/// A history change, reported before the new URL takes effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    /// Target URL as passed to the history method (absolute or relative)
    pub url: String,
    pub kind: NavigationKind,
}

impl Navigation {
    pub fn push(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: NavigationKind::Push,
        }
    }

    pub fn replace(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: NavigationKind::Replace,
        }
    }
}

pub type NavigationListener = Box<dyn FnMut(&Navigation)>;

/// Single registration point for navigation callbacks
pub trait NavigationObserver {
    fn subscribe(&mut self, listener: NavigationListener);
}

/// In-memory session history
#[derive(Default)]
pub struct History {
    entries: Vec<String>,
    listeners: Vec<NavigationListener>,
}

impl History {
    pub fn new(initial_url: impl Into<String>) -> Self {
        Self {
            entries: vec![initial_url.into()],
            listeners: Vec::new(),
        }
    }

    pub fn push_state(&mut self, url: impl Into<String>) {
        let navigation = Navigation::push(url);
        self.notify(&navigation);
        self.entries.push(navigation.url);
    }

    pub fn replace_state(&mut self, url: impl Into<String>) {
        let navigation = Navigation::replace(url);
        self.notify(&navigation);
        match self.entries.last_mut() {
            Some(last) => *last = navigation.url,
            None => self.entries.push(navigation.url),
        }
    }

    /// Current entry as last passed to the history API
    pub fn current(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&mut self, navigation: &Navigation) {
        for listener in &mut self.listeners {
            listener(navigation);
        }
    }
}

impl NavigationObserver for History {
    fn subscribe(&mut self, listener: NavigationListener) {
        self.listeners.push(listener);
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("entries", &self.entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
