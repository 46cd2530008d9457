//! A small stateful books service shared by the integration tests.
//!
//! `Library::handle` implements the service's behavior once; the in-memory
//! transport and the axum server both route requests through it.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quill_core::{HttpRequest, HttpResponse, Method, NetworkError, Transport};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Deliberate defects a test can switch on.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// DELETE answers 500 and keeps the book.
    pub broken_delete: bool,
    /// PUT on a missing id answers 200 instead of 404.
    pub update_creates: bool,
}

#[derive(Debug)]
struct State {
    books: BTreeMap<u64, Value>,
    next_id: u64,
    faults: Faults,
}

/// Books service state plus a call log with timing.
#[derive(Debug, Clone)]
pub struct Library {
    state: Arc<Mutex<State>>,
    calls: Arc<Mutex<Vec<Call>>>,
    delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub status: u16,
    pub started: Instant,
    pub finished: Instant,
}

impl Call {
    pub fn overlaps(&self, other: &Call) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

const USERS: [(&str, &str); 2] = [("user", "password"), ("admin", "password")];

impl Library {
    /// A library holding books 1 through 5.
    pub fn seeded() -> Self {
        let mut books = BTreeMap::new();
        for id in 1..=5u64 {
            books.insert(
                id,
                json!({"id": id, "name": format!("Book {id}"), "author": "Seed", "price": 10.0}),
            );
        }
        Self {
            state: Arc::new(Mutex::new(State {
                books,
                next_id: 6,
                faults: Faults::default(),
            })),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_faults(self, faults: Faults) -> Self {
        self.state.lock().unwrap().faults = faults;
        self
    }

    /// Every request takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.state.lock().unwrap().books.contains_key(&id)
    }

    pub fn log(&self, method: Method, path: &str, status: u16, started: Instant) {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            status,
            started,
            finished: Instant::now(),
        });
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Handles one request. Returns the status and an optional JSON body.
    pub fn handle(
        &self,
        method: Method,
        path: &str,
        authorization: Option<&str>,
        body: Option<&str>,
    ) -> (u16, Option<Value>) {
        if !authorized(authorization) {
            return (401, None);
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let mut state = self.state.lock().unwrap();

        match (method, segments.as_slice()) {
            (Method::Get, ["books"]) => {
                let books: Vec<Value> = state.books.values().cloned().collect();
                (200, Some(Value::Array(books)))
            }
            (Method::Post, ["books"]) => {
                let Some(mut book) = parse_book(body) else {
                    return (400, Some(json!({"error": "invalid book"})));
                };
                let id = state.next_id;
                state.next_id += 1;
                book["id"] = json!(id);
                state.books.insert(id, book.clone());
                (201, Some(book))
            }
            (Method::Get, ["books", id]) => match id.parse::<u64>().ok().and_then(|id| state.books.get(&id)) {
                Some(book) => (200, Some(book.clone())),
                None => (404, None),
            },
            (Method::Put, ["books", id]) => {
                let Ok(id) = id.parse::<u64>() else {
                    return (404, None);
                };
                let Some(mut book) = parse_book(body) else {
                    return (400, Some(json!({"error": "invalid book"})));
                };
                if !state.books.contains_key(&id) && !state.faults.update_creates {
                    return (404, None);
                }
                book["id"] = json!(id);
                state.books.insert(id, book.clone());
                (200, Some(book))
            }
            (Method::Delete, ["books", id]) => {
                if state.faults.broken_delete {
                    return (500, Some(json!({"error": "delete failed"})));
                }
                match id.parse::<u64>().ok().and_then(|id| state.books.remove(&id)) {
                    Some(_) => (200, None),
                    None => (404, None),
                }
            }
            _ => (404, None),
        }
    }
}

fn authorized(header: Option<&str>) -> bool {
    let Some(token) = header.and_then(|h| h.strip_prefix("Basic ")) else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(token) else {
        return false;
    };
    let Ok(pair) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = pair.split_once(':') else {
        return false;
    };
    USERS.iter().any(|(u, p)| *u == user && *p == pass)
}

/// A book needs a name, an author, and a non-negative price.
fn parse_book(body: Option<&str>) -> Option<Value> {
    let book: Value = serde_json::from_str(body?).ok()?;
    let name = book.get("name")?.as_str()?;
    let author = book.get("author")?.as_str()?;
    let price = book.get("price")?.as_f64()?;
    if name.is_empty() || author.is_empty() || price < 0.0 {
        return None;
    }
    Some(json!({"name": name, "author": author, "price": price}))
}

/// [`Transport`] that calls the library directly.
#[derive(Debug, Clone)]
pub struct InMemoryBooks {
    pub library: Library,
}

impl InMemoryBooks {
    pub fn new(library: Library) -> Self {
        Self { library }
    }
}

#[async_trait]
impl Transport for InMemoryBooks {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let started = Instant::now();
        let url = url::Url::parse(&request.url).map_err(|e| NetworkError::Other(e.to_string()))?;
        let path = url.path().to_string();

        if !self.library.delay().is_zero() {
            tokio::time::sleep(self.library.delay()).await;
        }

        let (status, body) = self.library.handle(
            request.method,
            &path,
            request.header("Authorization"),
            request.body.as_deref(),
        );
        self.library.log(request.method, &path, status, started);

        let mut response = match body {
            Some(body) => HttpResponse::json(status, &body),
            None => HttpResponse::new(status),
        };
        if status == 401 {
            response = response.with_header("WWW-Authenticate", "Basic realm=\"books\"");
        }
        Ok(response)
    }
}
