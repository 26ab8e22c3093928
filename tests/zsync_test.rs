use md4::{Digest, Md4};
use sha1::Sha1;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 1024;
const BOUNDARY: &str = "RZSYNC_TEST_BOUNDARY";

fn rzsync_bin() -> String {
    env!("CARGO_BIN_EXE_rzsync").to_string()
}

/// Run the binary with an isolated config directory and no RUST_LOG
fn rzsync(dir: &Path, args: &[&str]) -> Output {
    Command::new(rzsync_bin())
        .args(args)
        .current_dir(dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn target_data() -> Vec<u8> {
    let mut state = 0x1234_5678u32;
    (0..20_000)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Previous version: 100 bytes prepended, blocks 3 and 10 changed
fn old_version(target: &[u8]) -> Vec<u8> {
    let mut old = vec![0x5a; 100];
    old.extend_from_slice(target);
    for block in [3, 10] {
        let start = 100 + block * BLOCK_SIZE + 200;
        for byte in &mut old[start..start + 16] {
            *byte ^= 0xff;
        }
    }
    old
}

fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

fn rsum(block: &[u8]) -> u32 {
    let (mut a, mut b) = (0u16, 0u16);
    for (i, &byte) in block.iter().enumerate() {
        a = a.wrapping_add(byte as u16);
        b = b.wrapping_add(((block.len() - i) as u16).wrapping_mul(byte as u16));
    }
    ((a as u32) << 16) | b as u32
}

/// Control file in zsyncmake's layout with 4-byte weak and 16-byte strong sums
fn control_file(data: &[u8], seq_matches: u8, url: &str, sha1: &str) -> Vec<u8> {
    let mut out = format!(
        "zsync: 0.6.2\nFilename: target.bin\nMTime: Tue, 15 Aug 2023 10:00:00 +0000\n\
         Blocksize: {}\nLength: {}\nHash-Lengths: {},4,16\nURL: {}\nSHA-1: {}\n\n",
        BLOCK_SIZE,
        data.len(),
        seq_matches,
        url,
        sha1
    )
    .into_bytes();

    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = chunk.to_vec();
        block.resize(BLOCK_SIZE, 0);
        out.extend_from_slice(&rsum(&block).to_be_bytes());
        out.extend_from_slice(&Md4::digest(&block));
    }
    out
}

/// Minimal HTTP/1.1 server answering byte-range requests
struct TestServer {
    url: String,
    requests: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl TestServer {
    fn start(files: Vec<(String, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle(stream, &files, &log);
            }
        });

        Self { url, requests }
    }

    fn range_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, range)| range.clone())
            .collect()
    }
}

fn handle(mut stream: TcpStream, files: &[(String, Vec<u8>)], log: &Mutex<Vec<(String, Option<String>)>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();

    let mut range = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("range") {
                range = Some(value.trim().to_string());
            }
        }
    }
    log.lock().unwrap().push((path.clone(), range.clone()));

    let response = match files.iter().find(|(name, _)| *name == path) {
        None => http_response("404 Not Found", &[], b"not found".to_vec()),
        Some((_, data)) => match range {
            None => http_response("200 OK", &[], data.clone()),
            Some(spec) => range_response(&spec, data),
        },
    };
    let _ = stream.write_all(&response);
}

fn range_response(spec: &str, data: &[u8]) -> Vec<u8> {
    let ranges: Vec<(usize, usize)> = spec
        .trim_start_matches("bytes=")
        .split(',')
        .map(|r| {
            let (first, last) = r.trim().split_once('-').unwrap();
            (first.parse().unwrap(), last.parse().unwrap())
        })
        .collect();
    let total = data.len();

    if let [(first, last)] = ranges[..] {
        let content_range = format!("bytes {}-{}/{}", first, last, total);
        return http_response(
            "206 Partial Content",
            &[("Content-Range", &content_range)],
            data[first..=last].to_vec(),
        );
    }

    let mut body = Vec::new();
    for (first, last) in ranges {
        body.extend_from_slice(
            format!(
                "\r\n--{}\r\nContent-Type: application/octet-stream\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                BOUNDARY, first, last, total
            )
            .as_bytes(),
        );
        body.extend_from_slice(&data[first..=last]);
    }
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let content_type = format!("multipart/byteranges; boundary={}", BOUNDARY);
    http_response("206 Partial Content", &[("Content-Type", &content_type)], body)
}

fn http_response(status: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    let mut out = out.into_bytes();
    out.extend(body);
    out
}

#[test]
fn test_offline_reconstruction_from_local_input() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    fs::write(temp.path().join("old.bin"), &target).unwrap();
    fs::write(
        temp.path().join("target.bin.zsync"),
        control_file(&target, 1, "http://127.0.0.1:9/target.bin", &sha1_hex(&target)),
    )
    .unwrap();

    // Default output name comes from the Filename header
    let output = rzsync(temp.path(), &["target.bin.zsync", "-i", "old.bin", "--offline"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(fs::read(temp.path().join("target.bin")).unwrap(), target);
    assert!(!temp.path().join("target.bin.part").exists());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Download complete"));
}

#[test]
fn test_remote_control_file_and_range_fetch() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    let control = control_file(&target, 2, "target.bin", &sha1_hex(&target));
    let server = TestServer::start(vec![
        ("/files/target.bin.zsync".to_string(), control),
        ("/files/target.bin".to_string(), target.clone()),
    ]);
    fs::write(temp.path().join("old.bin"), old_version(&target)).unwrap();

    let control_url = format!("{}/files/target.bin.zsync", server.url);
    let output = rzsync(
        temp.path(),
        &[&control_url, "-i", "old.bin", "-o", "new.bin", "--quiet"],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(fs::read(temp.path().join("new.bin")).unwrap(), target);

    // Only the two changed blocks travel, in one multi-range request
    assert_eq!(
        server.range_requests(),
        vec!["bytes=3072-4095,10240-11263".to_string()]
    );
}

#[test]
fn test_max_ranges_splits_requests() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    let server = TestServer::start(vec![("/target.bin".to_string(), target.clone())]);
    fs::write(
        temp.path().join("a.zsync"),
        control_file(&target, 1, &format!("{}/target.bin", server.url), &sha1_hex(&target)),
    )
    .unwrap();
    fs::write(temp.path().join("old.bin"), old_version(&target)).unwrap();

    let output = rzsync(
        temp.path(),
        &["a.zsync", "-i", "old.bin", "-o", "new.bin", "--max-ranges", "1", "-q"],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(fs::read(temp.path().join("new.bin")).unwrap(), target);
    assert_eq!(
        server.range_requests(),
        vec!["bytes=3072-4095".to_string(), "bytes=10240-11263".to_string()]
    );
}

#[test]
fn test_relative_url_with_base_url() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    let server = TestServer::start(vec![("/mirror/target.bin".to_string(), target.clone())]);
    fs::write(
        temp.path().join("a.zsync"),
        control_file(&target, 1, "target.bin", &sha1_hex(&target)),
    )
    .unwrap();

    // No local data at all: every block is downloaded
    let base = format!("{}/mirror/", server.url);
    let output = rzsync(temp.path(), &["a.zsync", "-u", &base, "-o", "new.bin", "-q"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(fs::read(temp.path().join("new.bin")).unwrap(), target);
    assert_eq!(server.range_requests(), vec!["bytes=0-19999".to_string()]);
}

#[test]
fn test_json_events() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    fs::write(temp.path().join("old.bin"), &target).unwrap();
    fs::write(
        temp.path().join("a.zsync"),
        control_file(&target, 1, "http://127.0.0.1:9/target.bin", &sha1_hex(&target)),
    )
    .unwrap();

    let output = rzsync(
        temp.path(),
        &["a.zsync", "-i", "old.bin", "-o", "new.bin", "--offline", "--json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["start", "input", "complete"]);
    assert_eq!(events[2]["blocks_local"], 20);
    assert_eq!(events[2]["bytes_downloaded"], 0);
}

#[test]
fn test_checksum_mismatch_publishes_nothing() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    fs::write(temp.path().join("old.bin"), &target).unwrap();
    fs::write(
        temp.path().join("a.zsync"),
        control_file(&target, 1, "http://127.0.0.1:9/target.bin", &sha1_hex(b"something else")),
    )
    .unwrap();

    let output = rzsync(
        temp.path(),
        &["a.zsync", "-i", "old.bin", "-o", "new.bin", "--offline"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Checksum mismatch"));
    assert!(!temp.path().join("new.bin").exists());
    assert!(!temp.path().join("new.bin.part").exists());
}

#[test]
fn test_offline_incomplete_fails() {
    let temp = TempDir::new().unwrap();
    let target = target_data();
    fs::write(temp.path().join("old.bin"), old_version(&target)).unwrap();
    fs::write(
        temp.path().join("a.zsync"),
        control_file(&target, 1, "target.bin", &sha1_hex(&target)),
    )
    .unwrap();

    let output = rzsync(
        temp.path(),
        &["a.zsync", "-i", "old.bin", "-o", "new.bin", "--offline"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("2 blocks are still missing"));
    assert!(!temp.path().join("new.bin").exists());
}

#[test]
fn test_malformed_control_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("bad.zsync"), b"zsync: 0.6.2\nFilename: x\n").unwrap();

    let output = rzsync(temp.path(), &["bad.zsync", "--offline"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Malformed control file"));
}

#[test]
fn test_missing_input_rejected() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.zsync"), b"").unwrap();

    let output = rzsync(temp.path(), &["a.zsync", "-i", "nope.bin"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Input does not exist"));
}
