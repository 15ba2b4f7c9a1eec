//! Update flow integration tests
//!
//! Drive the full check-in, download, verify, apply and report sequence
//! against an in-memory update service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_ota::checksum::digest_bytes;
use a3s_ota::http::mock::http_response;
use a3s_ota::http::MockRequest;
use a3s_ota::{
    Context, ErrorKind, MockConnector, Outcome, UpdateError, UpdateRequest, Updater,
    UpdaterConfig,
};

const FIXTURE: &[u8] = b"\x7fELF firmware image v1.1.0 \x00\x01\x02\x03";

fn request(dir: &Path) -> UpdateRequest {
    UpdateRequest {
        host: "https://api.example.com".to_string(),
        product: "P1".to_string(),
        token: "T1".to_string(),
        device: "D1".to_string(),
        version: "1.0.0".to_string(),
        path: dir.join("update.bin"),
        ..UpdateRequest::default()
    }
}

fn offer(url: &str, checksum: &str) -> String {
    format!(
        r#"{{"url":"{}","checksum":"{}","update":"U1","version":"1.1.0"}}"#,
        url, checksum
    )
}

/// Service answering check-in with `check_in`, downloads with `artifact`
/// and reports with 200.
fn service(check_in: String, artifact: Vec<u8>) -> MockConnector {
    MockConnector::with_handler(move |req: &MockRequest| match req.target.as_str() {
        "/tok/provision/update" => http_response(200, check_in.as_bytes()),
        "/tok/provision/updateReport" => http_response(200, b"{}"),
        _ => http_response(200, &artifact),
    })
    .with_chunk_size(7)
}

fn run(connector: &MockConnector, req: &UpdateRequest) -> a3s_ota::Result<Outcome> {
    run_with(UpdaterConfig::default(), connector, req)
}

fn run_with(
    config: UpdaterConfig,
    connector: &MockConnector,
    req: &UpdateRequest,
) -> a3s_ota::Result<Outcome> {
    Updater::with_connector(config, Arc::new(connector.clone())).run(req, &Context::silent())
}

#[cfg(unix)]
fn script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("apply.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ─── Argument validation ─────────────────────────────────────────

#[test]
fn test_empty_parameters_make_no_network_call() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service("{}".to_string(), Vec::new());
    let base = request(dir.path());

    let mut cases = Vec::new();
    for field in ["host", "product", "token", "device", "version", "path"] {
        let mut req = base.clone();
        match field {
            "host" => req.host.clear(),
            "product" => req.product.clear(),
            "token" => req.token.clear(),
            "device" => req.device.clear(),
            "version" => req.version.clear(),
            _ => req.path = PathBuf::new(),
        }
        cases.push(req);
    }

    for req in &cases {
        let err = run(&connector, req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert_eq!(connector.connections(), 0);
}

// ─── Check-in ────────────────────────────────────────────────────

#[test]
fn test_no_update_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service("{}".to_string(), FIXTURE.to_vec());
    let req = request(dir.path());

    assert_eq!(run(&connector, &req).unwrap(), Outcome::NoUpdate);
    assert!(!req.path.exists());

    let reqs = connector.requests();
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].body, r#"{"id":"D1","product":"P1","version":"1.0.0"}"#);
    assert_eq!(reqs[0].header("Content-Length"), Some("44"));
}

#[test]
fn test_response_without_url_is_no_update() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service(
        r#"{"checksum":"abc","update":"U1","version":"1.1.0"}"#.to_string(),
        FIXTURE.to_vec(),
    );
    assert_eq!(run(&connector, &request(dir.path())).unwrap(), Outcome::NoUpdate);
    assert_eq!(connector.connections(), 1);
}

#[test]
fn test_properties_are_appended_to_check_in() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service("{}".to_string(), Vec::new());
    let mut req = request(dir.path());
    req.properties.insert("region".to_string(), "eu".to_string());
    req.properties.insert("board".to_string(), "rev2".to_string());

    run(&connector, &req).unwrap();
    assert_eq!(
        connector.requests()[0].body,
        r#"{"id":"D1","product":"P1","version":"1.0.0","board":"rev2","region":"eu"}"#
    );
}

#[test]
fn test_incomplete_offer_skips_download() {
    let dir = tempfile::tempdir().unwrap();
    let full = [
        ("checksum", "\"checksum\":\"abc\""),
        ("update", "\"update\":\"U1\""),
        ("version", "\"version\":\"1.1.0\""),
    ];
    for (missing, _) in &full {
        let fields: Vec<&str> = std::iter::once("\"url\":\"https://cdn/x.bin\"")
            .chain(full.iter().filter(|(k, _)| k != missing).map(|(_, v)| *v))
            .collect();
        let body = format!("{{{}}}", fields.join(","));
        let connector = service(body, FIXTURE.to_vec());
        let req = request(dir.path());

        let err = run(&connector, &req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteOffer, "missing {}", missing);
        assert!(err.to_string().contains(missing));
        assert_eq!(connector.connections(), 1);
        assert!(!req.path.exists());
    }
}

#[test]
fn test_bad_status_on_check_in() {
    let dir = tempfile::tempdir().unwrap();
    let connector = MockConnector::with_handler(|_| {
        b"HTTP/1.1 403 Forbidden\r\nContent-Length: 9\r\n\r\nforbidden".to_vec()
    });
    let err = run(&connector, &request(dir.path())).unwrap_err();
    assert!(matches!(err, UpdateError::BadStatus { status: 403, .. }));
    assert_eq!(err.kind(), ErrorKind::BadStatus);
    assert_eq!(connector.open_streams(), 0);
}

#[test]
fn test_malformed_check_in_response() {
    let dir = tempfile::tempdir().unwrap();
    let connector = MockConnector::with_handler(|_| b"HTTP/1.0 200 OK\r\n\r\n".to_vec());
    let err = run(&connector, &request(dir.path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

// ─── Download ────────────────────────────────────────────────────

#[test]
fn test_insecure_download_url_never_connects() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service(
        offer("http://cdn/x.bin", &digest_bytes(FIXTURE)),
        FIXTURE.to_vec(),
    );
    let req = request(dir.path());
    let err = run(&connector, &req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsecureUrl);
    // Check-in only
    assert_eq!(connector.connections(), 1);
    assert!(!req.path.exists());
}

#[test]
fn test_download_request_shape() {
    let dir = tempfile::tempdir().unwrap();
    let connector = service(
        offer("https://cdn.example.com:8443/fw/x.bin", &digest_bytes(FIXTURE)),
        FIXTURE.to_vec(),
    );
    run(&connector, &request(dir.path())).unwrap();

    let reqs = connector.requests();
    assert_eq!(reqs.len(), 2);
    assert_eq!(reqs[1].method, "GET");
    assert_eq!(reqs[1].target, "/fw/x.bin");
    assert_eq!(reqs[1].endpoint.host, "cdn.example.com");
    assert_eq!(reqs[1].endpoint.port, 8443);
    assert_eq!(reqs[1].header("Accept"), Some("*/*"));
    assert_eq!(reqs[1].header("Content-Length"), Some("0"));
}

#[test]
fn test_corrupted_artifact_is_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut corrupted = FIXTURE.to_vec();
    corrupted[5] ^= 0x01;
    let connector = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), corrupted.clone());
    let req = request(dir.path());

    let err = run(&connector, &req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    // Evidence stays on disk
    assert_eq!(std::fs::read(&req.path).unwrap(), corrupted);
}

#[test]
fn test_checksum_comparison_is_case_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let upper = digest_bytes(FIXTURE).to_uppercase();
    let connector = service(offer("https://cdn/x.bin", &upper), FIXTURE.to_vec());
    let err = run(&connector, &request(dir.path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
}

#[test]
fn test_second_run_without_update_keeps_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path());

    let first = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), FIXTURE.to_vec());
    assert_eq!(
        run(&first, &req).unwrap(),
        Outcome::Downloaded {
            version: "1.1.0".to_string()
        }
    );
    let modified = std::fs::metadata(&req.path).unwrap().modified().unwrap();

    let second = service("{}".to_string(), b"should never be fetched".to_vec());
    assert_eq!(run(&second, &req).unwrap(), Outcome::NoUpdate);
    assert_eq!(second.connections(), 1);
    assert_eq!(std::fs::read(&req.path).unwrap(), FIXTURE);
    assert_eq!(
        std::fs::metadata(&req.path).unwrap().modified().unwrap(),
        modified
    );
}

#[cfg(unix)]
#[test]
fn test_symlink_destination_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let victim = dir.path().join("victim");
    std::fs::write(&victim, b"do not touch").unwrap();
    let req = request(dir.path());
    std::os::unix::fs::symlink(&victim, &req.path).unwrap();

    let connector = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), FIXTURE.to_vec());
    let err = run(&connector, &req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LocalIoFailure);
    assert_eq!(std::fs::read(&victim).unwrap(), b"do not touch");
}

#[test]
fn test_oversized_download_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let check_in = offer("https://cdn/x.bin", &digest_bytes(FIXTURE));
    let connector = MockConnector::with_handler(move |req: &MockRequest| {
        if req.method == "POST" {
            http_response(200, check_in.as_bytes())
        } else {
            b"HTTP/1.1 200 OK\r\nContent-Length: 104857601\r\n\r\n".to_vec()
        }
    });
    let req = request(dir.path());
    let err = run(&connector, &req).unwrap_err();
    assert!(matches!(err, UpdateError::InvalidContentLength(_)));
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert!(!req.path.exists());
}

#[test]
fn test_content_length_limit_is_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    // Check-in responses are far below this limit
    let limit = 4096;
    let config = UpdaterConfig {
        max_content_length: limit as u64,
        ..UpdaterConfig::default()
    };

    let artifact = vec![0xa5u8; limit];
    let exact = service(offer("https://cdn/x.bin", &digest_bytes(&artifact)), artifact.clone());
    assert!(run_with(config.clone(), &exact, &request(dir.path())).is_ok());

    let mut bigger = artifact;
    bigger.push(0);
    let over = service(offer("https://cdn/x.bin", &digest_bytes(&bigger)), bigger);
    let err = run_with(config, &over, &request(dir.path())).unwrap_err();
    assert!(matches!(err, UpdateError::InvalidContentLength(_)));
}

#[test]
fn test_missing_content_length_on_download() {
    let dir = tempfile::tempdir().unwrap();
    let check_in = offer("https://cdn/x.bin", &digest_bytes(FIXTURE));
    let connector = MockConnector::with_handler(move |req: &MockRequest| {
        if req.method == "POST" {
            http_response(200, check_in.as_bytes())
        } else {
            b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\nbody".to_vec()
        }
    });
    let err = run(&connector, &request(dir.path())).unwrap_err();
    assert!(matches!(err, UpdateError::MissingContentLength));
}

// ─── Apply & report ──────────────────────────────────────────────

#[cfg(unix)]
#[test]
fn test_update_applied_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("applied-with");
    let mut req = request(dir.path());
    req.script = Some(script(
        dir.path(),
        &format!("cp \"$1\" '{}'", seen.display()),
    ));

    let connector = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), FIXTURE.to_vec());
    let outcome = run(&connector, &req).unwrap();
    assert_eq!(
        outcome,
        Outcome::Applied {
            version: "1.1.0".to_string(),
            update_id: "U1".to_string()
        }
    );
    assert_eq!(std::fs::read(&seen).unwrap(), FIXTURE);

    let reqs = connector.requests();
    assert_eq!(reqs.len(), 3);
    assert_eq!(reqs[2].method, "POST");
    assert_eq!(reqs[2].target, "/tok/provision/updateReport");
    assert_eq!(reqs[2].body, r#"{"success":"true","id":"D1","update":"U1"}"#);
    assert_eq!(reqs[2].header("Authorization"), Some("T1"));
    assert_eq!(reqs[2].header("Content-Type"), Some("application/json"));
    assert_eq!(connector.open_streams(), 0);
}

#[cfg(unix)]
#[test]
fn test_report_is_authorized() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path());
    req.script = Some(script(dir.path(), "exit 0"));

    // Every endpoint of this service demands the device token
    let check_in = offer("https://cdn/x.bin", &digest_bytes(FIXTURE));
    let connector = MockConnector::with_handler(move |r: &MockRequest| {
        if r.endpoint.host == "api.example.com" && r.header("Authorization") != Some("T1") {
            return b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n".to_vec();
        }
        match r.target.as_str() {
            "/tok/provision/update" => http_response(200, check_in.as_bytes()),
            "/tok/provision/updateReport" => http_response(200, b"{}"),
            _ => http_response(200, FIXTURE),
        }
    });

    let outcome = run(&connector, &req).unwrap();
    assert!(matches!(outcome, Outcome::Applied { .. }));
    assert_eq!(connector.requests().len(), 3);
}

#[cfg(unix)]
#[test]
fn test_failed_apply_is_reported_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path());
    req.script = Some(script(dir.path(), "exit 4"));

    let connector = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), FIXTURE.to_vec());
    let err = run(&connector, &req).unwrap_err();
    assert!(matches!(err, UpdateError::ApplyFailed(4)));
    assert_eq!(err.kind(), ErrorKind::ApplyFailure);

    let reqs = connector.requests();
    assert_eq!(reqs.len(), 3);
    assert_eq!(reqs[2].body, r#"{"success":"false","id":"D1","update":"U1"}"#);
}

#[test]
fn test_unlaunchable_apply_program() {
    let dir = tempfile::tempdir().unwrap();
    let mut req = request(dir.path());
    req.script = Some(dir.path().join("missing-apply"));

    let connector = service(offer("https://cdn/x.bin", &digest_bytes(FIXTURE)), FIXTURE.to_vec());
    let err = run(&connector, &req).unwrap_err();
    assert!(matches!(err, UpdateError::ApplyFailed(-1)));
}

#[cfg(unix)]
#[test]
fn test_report_failure_after_successful_apply() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("applied");
    let mut req = request(dir.path());
    req.script = Some(script(dir.path(), &format!("touch '{}'", marker.display())));

    let check_in = offer("https://cdn/x.bin", &digest_bytes(FIXTURE));
    let connector = MockConnector::with_handler(move |req: &MockRequest| {
        match req.target.as_str() {
            "/tok/provision/update" => http_response(200, check_in.as_bytes()),
            "/tok/provision/updateReport" => Vec::new(),
            _ => http_response(200, FIXTURE),
        }
    });
    let err = run(&connector, &req).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReportFailure);
    // The apply step is not undone
    assert!(marker.exists());
}
