//! Test harness for queue and fetch integration tests.
//!
//! `TestHarness` owns:
//! - a SQLite database (in memory, or a file for multi-connection tests)
//!   with a migrated `documents` table
//! - a `FixtureServer` on 127.0.0.1 serving documents registered by the test

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use sea_orm::sea_query::Query;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use uuid::Uuid;

use pdfharvest::db::{migrations, DocumentRecord, Documents};
use pdfharvest::fetch::{ContentFetcher, FetchLimits};
use pdfharvest::pipeline::{PipelineConfig, RowProcessor};
use pdfharvest::processor::TextExtractor;
use pdfharvest::{DocumentQueue, QueueSettings, QueueTable};

/// A document served under `/files/{name}`.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub body: Bytes,
    pub content_type: Option<&'static str>,
    pub disposition: Option<String>,
    /// Requests answered with 503 before the body is served.
    pub fail_first: usize,
}

impl Fixture {
    pub fn pdf(body: Vec<u8>) -> Self {
        Self {
            body: Bytes::from(body),
            content_type: Some("application/pdf"),
            disposition: None,
            fail_first: 0,
        }
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_disposition(mut self, disposition: &str) -> Self {
        self.disposition = Some(disposition.to_string());
        self
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }
}

#[derive(Clone, Default)]
struct ServerState {
    fixtures: Arc<Mutex<HashMap<String, Fixture>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// Local HTTP server for fetch tests.
///
/// Routes:
/// - `/files/{name}`: registered fixtures
/// - `/status/{code}`: an empty response with that status
/// - `/big/{mb}`: a chunked PDF body of `mb` MiB without Content-Length
/// - `/slow`: a PDF after a two second pause
pub struct FixtureServer {
    addr: SocketAddr,
    state: ServerState,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new()
            .route("/files/:name", get(serve_file))
            .route("/status/:code", get(serve_status))
            .route("/big/:mb", get(serve_big))
            .route("/slow", get(serve_slow))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fixture server");
        let addr = listener.local_addr().expect("Fixture server has no address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fixture server failed");
        });

        Self { addr, state }
    }

    pub fn add(&self, name: &str, fixture: Fixture) {
        self.state
            .fixtures
            .lock()
            .unwrap()
            .insert(name.to_string(), fixture);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn file_url(&self, name: &str) -> String {
        self.url(&format!("files/{}", name))
    }

    /// Requests seen for `/files/{name}`.
    pub fn hits(&self, name: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

async fn serve_file(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    let hit = {
        let mut hits = state.hits.lock().unwrap();
        let count = hits.entry(name.clone()).or_insert(0);
        *count += 1;
        *count
    };
    let Some(fixture) = state.fixtures.lock().unwrap().get(&name).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if hit <= fixture.fail_first {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let mut response = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = fixture.content_type {
        response = response.header(header::CONTENT_TYPE, content_type);
    }
    if let Some(disposition) = &fixture.disposition {
        response = response.header(header::CONTENT_DISPOSITION, disposition.as_str());
    }
    response.body(Body::from(fixture.body)).unwrap()
}

async fn serve_status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn serve_big(Path(mb): Path<u64>) -> Response {
    const CHUNK: usize = 64 * 1024;
    let mut first = b"%PDF-1.4\n".to_vec();
    first.resize(CHUNK, b'0');
    let first = Bytes::from(first);
    let filler = Bytes::from(vec![b'0'; CHUNK]);
    let chunks = mb * 16;

    let stream = futures_util::stream::iter((0..chunks).map(move |i| {
        Ok::<_, std::io::Error>(if i == 0 { first.clone() } else { filler.clone() })
    }));

    Response::builder()
        .header(header::CONTENT_TYPE, "application/pdf")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn serve_slow() -> Response {
    tokio::time::sleep(Duration::from_secs(2)).await;
    (
        [(header::CONTENT_TYPE, "application/pdf")],
        b"%PDF-1.4\n".to_vec(),
    )
        .into_response()
}

/// Isolated queue database and fixture server.
pub struct TestHarness {
    pub conn: DatabaseConnection,
    pub table: QueueTable,
    pub server: FixtureServer,
}

impl TestHarness {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        Self::with_options(options).await
    }

    /// A database file in `dir` shared by `connections` pooled connections,
    /// so claims from different tasks really overlap.
    pub async fn file_backed(dir: &std::path::Path, connections: u32) -> Self {
        let url = format!("sqlite://{}?mode=rwc", dir.join("queue.db").display());
        let mut options = ConnectOptions::new(url);
        options
            .max_connections(connections)
            .min_connections(connections)
            .sqlx_logging(false);
        Self::with_options(options).await
    }

    async fn with_options(options: ConnectOptions) -> Self {
        let conn = Database::connect(options)
            .await
            .expect("Failed to open test database");
        let table = QueueTable::parse("documents").unwrap();
        migrations::run_all(&conn, &table)
            .await
            .expect("Failed to migrate queue table");

        Self {
            conn,
            table,
            server: FixtureServer::start().await,
        }
    }

    /// A queue with its own claim token over the shared database.
    pub fn queue(&self, settings: QueueSettings) -> DocumentQueue {
        DocumentQueue::new(self.conn.clone(), self.table.clone(), settings)
    }

    pub async fn insert_row(&self, url: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        let mut insert = Query::insert();
        insert
            .into_table(self.table.table_ref())
            .columns([Documents::Id, Documents::PdfUrl])
            .values_panic([id.into(), url.map(str::to_string).into()]);
        self.conn
            .execute(self.conn.get_database_backend().build(&insert))
            .await
            .expect("Failed to insert row");
        id
    }

    pub async fn insert_rows(&self, url: &str, n: usize) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(self.insert_row(Some(url)).await);
        }
        ids
    }

    pub async fn record(&self, id: Uuid) -> DocumentRecord {
        self.queue(QueueSettings::default())
            .find_by_id(id)
            .await
            .unwrap()
            .expect("row not found")
    }

    pub fn processor(
        &self,
        limits: FetchLimits,
        extractor: Arc<dyn TextExtractor>,
    ) -> RowProcessor {
        RowProcessor::new(
            Arc::new(PipelineConfig::default()),
            Arc::new(ContentFetcher::new(limits).unwrap()),
            extractor,
        )
    }
}
