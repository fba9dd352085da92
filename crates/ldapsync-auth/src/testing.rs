//! In-memory directory server for tests
//!
//! Understands simple binds and subtree searches with `&`, `|`, `!`,
//! equality and presence filters. Counts every operation so tests can
//! assert which network calls a flow made.

use async_trait::async_trait;
use ldapsync_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::ldap::{ConnectionTarget, DirectoryConnection, DirectoryConnector, RawEntry};

#[derive(Default)]
struct FakeState {
    entries: Mutex<Vec<RawEntry>>,
    /// Lowercased DN to password
    passwords: Mutex<HashMap<String, String>>,
    unreachable: Mutex<bool>,
    failing_searches: AtomicUsize,
    generation: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    connects: AtomicUsize,
    binds: AtomicUsize,
    searches: AtomicUsize,
    pings: AtomicUsize,
}

/// Shared handle to an in-memory directory
#[derive(Clone, Default)]
pub struct FakeDirectory {
    state: Arc<FakeState>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// An account that can bind but is not a user entry
    pub fn add_account(&self, dn: &str, password: &str) {
        self.state
            .passwords
            .lock()
            .insert(dn.to_lowercase(), password.to_string());
    }

    /// A `person` entry with a password
    pub fn add_user(&self, dn: &str, password: &str, attrs: &[(&str, &str)]) {
        self.add_account(dn, password);
        self.add_entry(dn, attrs);
    }

    /// A `person` entry without a password; attributes may repeat
    pub fn add_entry(&self, dn: &str, attrs: &[(&str, &str)]) {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in attrs {
            map.entry(name.to_string()).or_default().push(value.to_string());
        }
        if !map.keys().any(|k| k.eq_ignore_ascii_case("objectClass")) {
            map.insert("objectClass".into(), vec!["person".into()]);
        }

        let mut entries = self.state.entries.lock();
        entries.retain(|e| !e.dn.eq_ignore_ascii_case(dn));
        entries.push(RawEntry {
            dn: dn.to_string(),
            attrs: map,
        });
    }

    pub fn remove_entry(&self, dn: &str) {
        self.state
            .entries
            .lock()
            .retain(|e| !e.dn.eq_ignore_ascii_case(dn));
    }

    pub fn set_attribute(&self, dn: &str, name: &str, values: &[&str]) {
        let mut entries = self.state.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.dn.eq_ignore_ascii_case(dn)) {
            entry.attrs.insert(
                name.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            );
        }
    }

    /// Refuse new connections and fail existing ones
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.state.unreachable.lock() = unreachable;
        if unreachable {
            self.drop_open_connections();
        }
    }

    /// Break every connection opened so far
    pub fn drop_open_connections(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The next `n` searches fail with a transport error
    pub fn fail_next_searches(&self, n: usize) {
        self.state.failing_searches.store(n, Ordering::SeqCst);
    }

    /// Searches block after being counted until [`release_searches`](Self::release_searches)
    pub fn hold_searches(&self) {
        *self.state.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_searches(&self) {
        if let Some(gate) = self.state.gate.lock().take() {
            gate.close();
        }
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.state.binds.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.state.searches.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryConnector for FakeDirectory {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Box<dyn DirectoryConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if *self.state.unreachable.lock() {
            return Err(Error::Connection(format!(
                "Failed to connect to {}: connection refused",
                target.url
            )));
        }

        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
            generation: self.state.generation.load(Ordering::SeqCst),
        }))
    }
}

struct FakeConnection {
    state: Arc<FakeState>,
    generation: usize,
}

impl FakeConnection {
    fn check_alive(&self) -> Result<()> {
        if self.generation != self.state.generation.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection reset by peer".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryConnection for FakeConnection {
    async fn bind(&mut self, dn: &str, secret: &str) -> Result<()> {
        self.state.binds.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;

        match self.state.passwords.lock().get(&dn.to_lowercase()) {
            Some(expected) if expected == secret => Ok(()),
            _ => Err(Error::InvalidCredentials),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<RawEntry>> {
        self.state.searches.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            // Closed when released
            let _ = gate.acquire().await;
        }

        self.check_alive()?;

        let failing = self.state.failing_searches.load(Ordering::SeqCst);
        if failing > 0 {
            self.state.failing_searches.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Connection("connection reset by peer".into()));
        }

        let filter = Filter::parse(filter)?;
        let base = base.to_lowercase();

        let entries = self.state.entries.lock();
        Ok(entries
            .iter()
            .filter(|e| e.dn.to_lowercase().ends_with(&base))
            .filter(|e| filter.matches(&e.attrs))
            .map(|e| RawEntry {
                dn: e.dn.clone(),
                attrs: e
                    .attrs
                    .iter()
                    .filter(|(name, _)| {
                        attrs.is_empty() || attrs.iter().any(|a| a.eq_ignore_ascii_case(name))
                    })
                    .map(|(name, values)| (name.clone(), values.clone()))
                    .collect(),
            })
            .collect())
    }

    async fn ping(&mut self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        self.check_alive()
    }

    async fn unbind(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Result<Self> {
        let mut parser = FilterParser {
            input: input.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(invalid_filter(input));
        }
        Ok(filter)
    }

    fn matches(&self, attrs: &HashMap<String, Vec<String>>) -> bool {
        let values = |name: &str| {
            attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_slice())
                .unwrap_or(&[])
        };

        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(attrs)),
            Filter::Or(items) => items.iter().any(|f| f.matches(attrs)),
            Filter::Not(inner) => !inner.matches(attrs),
            Filter::Present(name) => !values(name).is_empty(),
            Filter::Equal(name, value) => values(name).iter().any(|v| v.eq_ignore_ascii_case(value)),
        }
    }
}

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            _ => self.item()?,
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        while self.input.get(self.pos) == Some(&b'(') {
            items.push(self.filter()?);
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos] != b')' {
            self.pos += 1;
        }
        let raw = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        let (name, value) = raw.split_once('=').ok_or_else(|| invalid_filter(&raw))?;

        if value == "*" {
            Ok(Filter::Present(name.to_string()))
        } else {
            Ok(Filter::Equal(name.to_string(), unescape(value)))
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(invalid_filter(&String::from_utf8_lossy(self.input)))
        }
    }
}

/// Reverse RFC 4515 `\XX` escapes
fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn invalid_filter(filter: &str) -> Error {
    Error::Search(format!("Invalid search filter: {}", filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    #[test]
    fn test_filter_matching() {
        let entry = attrs(&[("objectClass", "person"), ("uid", "alice"), ("mail", "a@x.io")]);

        assert!(Filter::parse("(objectClass=person)").unwrap().matches(&entry));
        assert!(Filter::parse("(&(objectClass=person)(UID=Alice))").unwrap().matches(&entry));
        assert!(Filter::parse("(|(uid=bob)(mail=*))").unwrap().matches(&entry));
        assert!(!Filter::parse("(!(uid=alice))").unwrap().matches(&entry));
        assert!(!Filter::parse("(uid=al\\2a)").unwrap().matches(&entry));
        assert!(Filter::parse("(uid=alice").is_err());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\2ab"), "a*b");
        assert_eq!(unescape("\\28x\\29"), "(x)");
        assert_eq!(unescape("trail\\"), "trail\\");
    }
}
