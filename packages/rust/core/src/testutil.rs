//! Fixtures shared by the worker and pipeline tests.

use std::io::Write;
use std::sync::Arc;

use affilscan_fetcher::{CHALLENGE_SIGNATURE, FetchSession};
use affilscan_shared::FetchConfig;
use affilscan_storage::Storage;
use flate2::Compression;
use flate2::write::GzEncoder;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_USER_AGENT: &str = "affilscan-test/1.0";

/// Build a gzip-compressed tarball from `(name, text)` pairs.
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, text) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(text.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, text.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

pub fn challenge_page() -> Vec<u8> {
    let mut body = CHALLENGE_SIGNATURE.to_vec();
    body.extend_from_slice(b"\n     </head>\n     <body>are you a robot?</body>\n</html>");
    body
}

/// Serve `body` as the source download of record `id`.
pub async fn mount_source(server: &MockServer, id: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/e-print/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

pub fn abs_link(server: &MockServer, id: &str) -> String {
    format!("{}/abs/{id}", server.uri())
}

pub fn test_session() -> FetchSession {
    FetchSession::with_user_agent(&FetchConfig::default().without_delay(), TEST_USER_AGENT)
        .unwrap()
}

pub async fn scratch_storage(dir: &tempfile::TempDir) -> Arc<Storage> {
    let storage = Storage::at(dir.path().join("failed_tex"), dir.path().join("errors.txt"))
        .await
        .unwrap();
    Arc::new(storage)
}

/// Contents of the diagnostic log, empty when nothing was written.
pub fn read_log(storage: &Storage) -> String {
    std::fs::read_to_string(storage.error_log()).unwrap_or_default()
}
