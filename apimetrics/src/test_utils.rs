//! Test fixtures shared across modules.

use std::io::Write;
use std::sync::Arc;

use axum_test::TestServer;
use tempfile::NamedTempFile;

use crate::insights::InsightGenerator;
use crate::log_table::{LogTable, MalformedRecordPolicy, RawRecord, RequestRecord};
use crate::sources::CsvSource;
use crate::{AppState, build_router};

pub const LOG_HEADER: &str = "request_id,api_name,timestamp,latency_ms,status_code,document_type,region,device_type,error_reason\n";

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// A raw row with the optional descriptive columns left out.
pub fn raw(request_id: &str, api_name: &str, latency_ms: &str, status_code: &str, error_reason: &str, region: &str) -> RawRecord {
    RawRecord {
        request_id: request_id.to_string(),
        api_name: api_name.to_string(),
        latency_ms: latency_ms.to_string(),
        status_code: status_code.to_string(),
        error_reason: non_empty(error_reason),
        region: region.to_string(),
        ..Default::default()
    }
}

pub fn record(request_id: &str, api_name: &str, latency_ms: f64, status_code: i64, error_reason: Option<&str>, region: &str) -> RequestRecord {
    RequestRecord {
        request_id: request_id.to_string(),
        api_name: api_name.to_string(),
        timestamp: None,
        latency_ms: Some(latency_ms),
        status_code: Some(status_code),
        error_reason: error_reason.map(str::to_string),
        region: region.to_string(),
        document_type: None,
        device_type: None,
    }
}

/// Three APIs over three regions with a mix of successes and failures.
pub fn sample_table() -> LogTable {
    LogTable::new(vec![
        record("r1", "OCR_PAN", 1180.0, 200, None, "Metro"),
        record("r2", "OCR_PAN", 1710.0, 500, Some("TIMEOUT"), "Tier-1"),
        record("r3", "FACE_MATCH", 870.0, 200, None, "Metro"),
        record("r4", "KYC_VERIFY", 650.0, 200, None, "Rural"),
        record("r5", "FACE_MATCH", 1420.0, 422, Some("FACE_MISMATCH"), "Metro"),
        record("r6", "OCR_PAN", 1330.0, 400, Some("BLURRY_IMAGE"), "Rural"),
        record("r7", "KYC_VERIFY", 720.0, 200, None, "Tier-1"),
        record("r8", "OCR_PAN", 1905.0, 500, Some("TIMEOUT"), "Metro"),
        record("r9", "FACE_MATCH", 910.0, 200, None, "Tier-1"),
    ])
}

pub fn write_log_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp log file");
    file.write_all(contents.as_bytes()).expect("write temp log file");
    file.flush().expect("flush temp log file");
    file
}

/// Test server over a CSV source holding `rows` beneath the standard header.
///
/// The temp file is returned so it lives as long as the server.
pub fn create_test_server(rows: &str, insights: Option<Arc<dyn InsightGenerator>>) -> (TestServer, NamedTempFile) {
    create_test_server_raw(&format!("{LOG_HEADER}{rows}"), insights)
}

/// Test server over a CSV source holding exactly `contents`.
pub fn create_test_server_raw(contents: &str, insights: Option<Arc<dyn InsightGenerator>>) -> (TestServer, NamedTempFile) {
    let file = write_log_file(contents);
    let source = Arc::new(CsvSource::new(file.path(), b',', MalformedRecordPolicy::Lenient));
    let server = TestServer::new(build_router(AppState::new(source, insights))).expect("create test server");
    (server, file)
}
