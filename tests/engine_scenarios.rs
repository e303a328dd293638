//! End-to-end scenarios S1-S6 driven through `Engine::run`, against a
//! `wiremock` stand-in for the remote store. Each test builds the
//! `(local, remote, cached)` triple for one scenario and asserts the
//! resolved action and its effect on disk and cache.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use filetime::FileTime;
use lox_sync::actions::Engine;
use lox_sync::cache::Cache;
use lox_sync::client::RemoteClient;
use lox_sync::keyring::Keyring;
use lox_sync::model::{FileInfo, Path};
use lox_sync::resolver::{resolve, Action};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

async fn mock_token_endpoint(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/oauth/v2/token"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"access_token": "test-token",
			"expires_in": 3600,
		})))
		.mount(server)
		.await;
}

fn build_engine(server: &MockServer, local_root: PathBuf, cache_path: PathBuf) -> Engine {
	let token_url = format!("{}/oauth/v2/token", server.uri());
	let client = RemoteClient::new(server.uri(), token_url, "alice", "hunter2", false).unwrap();
	let cache = Cache::open(&cache_path, local_root.to_string_lossy().as_ref(), "v1").unwrap();
	let keyring = Keyring::new("alice", local_root.clone(), "hunter2".to_string());
	Engine { local_root, client, cache, keyring, encrypt_default: false }
}

fn unix_ts(rfc3339: &str) -> i64 {
	chrono::DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp()
}

#[tokio::test]
async fn s1_new_local_file_uploads_and_adopts_server_mtime() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	fs::write(dir.path().join("hello.txt"), b"hi\n").unwrap();
	filetime::set_file_mtime(dir.path().join("hello.txt"), FileTime::from_unix_time(unix_ts("2024-01-01T00:00:00Z"), 0)).unwrap();

	let server_modified = "2024-01-01T00:00:05Z";
	Mock::given(method("POST"))
		.and(path("/lox_api/files/hello.txt"))
		.respond_with(ResponseTemplate::new(201))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/lox_api/meta/hello.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": false,
			"modified_at": server_modified,
			"size": 3,
		})))
		.mount(&server)
		.await;

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	let path = Path::new("hello.txt", None);

	let local = engine.file_info_local(&path).unwrap();
	let remote = FileInfo::absent();
	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(resolve(&local, &remote, &cached), Action::Upload);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::Upload, &mut queue).await.unwrap();

	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(cached.size, 3);
	assert_eq!(cached.modified, unix_ts(server_modified));

	let meta = fs::metadata(dir.path().join("hello.txt")).unwrap();
	let mtime = FileTime::from_last_modification_time(&meta);
	assert_eq!(mtime.unix_seconds(), unix_ts(server_modified));
}

#[tokio::test]
async fn s2_new_remote_file_downloads_with_remote_mtime() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	let remote_modified = "2024-02-01T12:00:00Z";
	Mock::given(method("GET"))
		.and(path("/lox_api/meta/greet.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": false,
			"modified_at": remote_modified,
			"size": 5,
		})))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/lox_api/files/greet.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
		.mount(&server)
		.await;

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	let path = Path::new("greet.txt", None);

	let local = engine.file_info_local(&path).unwrap();
	let remote = engine.file_info_remote(&path).await.unwrap();
	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(resolve(&local, &remote, &cached), Action::Download);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::Download, &mut queue).await.unwrap();

	let contents = fs::read(dir.path().join("greet.txt")).unwrap();
	assert_eq!(contents, b"hello");

	let meta = fs::metadata(dir.path().join("greet.txt")).unwrap();
	let mtime = FileTime::from_last_modification_time(&meta);
	assert_eq!(mtime.unix_seconds(), unix_ts(remote_modified));

	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(cached.size, 5);
}

#[tokio::test]
async fn s3_convergent_edit_updates_cache_without_transfer() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	let modified = "2024-03-01T00:00:00Z";
	fs::write(dir.path().join("a.txt"), b"same bytes").unwrap();
	filetime::set_file_mtime(dir.path().join("a.txt"), FileTime::from_unix_time(unix_ts(modified), 0)).unwrap();

	Mock::given(method("GET"))
		.and(path("/lox_api/meta/a.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": false,
			"modified_at": modified,
			"size": 10,
		})))
		.mount(&server)
		.await;

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	let path = Path::new("a.txt", None);

	let local = engine.file_info_local(&path).unwrap();
	let remote = engine.file_info_remote(&path).await.unwrap();
	let cached = engine.file_info_cache(&path).unwrap();
	assert!(cached.is_absent());
	assert_eq!(resolve(&local, &remote, &cached), Action::UpdateCache);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::UpdateCache, &mut queue).await.unwrap();

	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(cached.modified, unix_ts(modified));
	assert_eq!(cached.size, 10);
}

#[tokio::test]
async fn s5_remote_deletion_removes_local_file_and_cache_entry() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	Mock::given(method("GET"))
		.and(path("/lox_api/meta/gone.bin"))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;

	fs::write(dir.path().join("gone.bin"), vec![0u8; 32]).unwrap();
	let modified = "2024-04-01T00:00:00Z";
	filetime::set_file_mtime(dir.path().join("gone.bin"), FileTime::from_unix_time(unix_ts(modified), 0)).unwrap();

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	let path = Path::new("gone.bin", None);
	engine.cache.set(&path.name, &FileInfo::file(unix_ts(modified), 32)).unwrap();

	let local = engine.file_info_local(&path).unwrap();
	let remote = engine.file_info_remote(&path).await.unwrap();
	let cached = engine.file_info_cache(&path).unwrap();
	assert!(remote.is_absent());
	assert_eq!(resolve(&local, &remote, &cached), Action::DeleteLocal);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::DeleteLocal, &mut queue).await.unwrap();

	assert!(!dir.path().join("gone.bin").exists());
	assert!(engine.file_info_cache(&path).unwrap().is_absent());
}

#[tokio::test]
async fn s4_conflict_preserves_local_bytes_under_a_sibling_and_downloads_remote() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	let local_modified = "2024-05-01T00:00:00Z";
	let remote_modified = "2024-05-02T00:00:00Z";
	fs::write(dir.path().join("c.txt"), b"AAAAAAAAAA").unwrap();
	filetime::set_file_mtime(dir.path().join("c.txt"), FileTime::from_unix_time(unix_ts(local_modified), 0)).unwrap();

	Mock::given(method("GET"))
		.and(path("/lox_api/meta/c.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": false,
			"modified_at": remote_modified,
			"size": 12,
		})))
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/lox_api/files/c.txt"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(b"BBBBBBBBBBBB".to_vec()))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(201))
		.mount(&server)
		.await;
	// The conflict sibling's generated name embeds a random hex suffix; match
	// any `c_conflict_*.txt` for the post-upload `meta()` timestamp pull.
	Mock::given(method("GET"))
		.and(path_regex(r"^/lox_api/meta/c_conflict_.*\.txt$"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": false,
			"modified_at": "2024-05-03T00:00:00Z",
			"size": 10,
		})))
		.mount(&server)
		.await;

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	let path = Path::new("c.txt", None);

	let local = engine.file_info_local(&path).unwrap();
	let remote = engine.file_info_remote(&path).await.unwrap();
	let cached = engine.file_info_cache(&path).unwrap();
	assert!(cached.is_absent());
	assert_ne!(local.modified, remote.modified);
	assert_eq!(resolve(&local, &remote, &cached), Action::Conflict);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::Conflict, &mut queue).await.unwrap();

	let canonical = fs::read(dir.path().join("c.txt")).unwrap();
	assert_eq!(canonical, b"BBBBBBBBBBBB");

	let sibling = fs::read_dir(dir.path())
		.unwrap()
		.filter_map(|e| e.ok())
		.find(|e| {
			let name = e.file_name().to_string_lossy().into_owned();
			name.starts_with("c_conflict_") && name.ends_with(".txt")
		})
		.expect("conflict sibling present");
	let sibling_bytes = fs::read(sibling.path()).unwrap();
	assert_eq!(sibling_bytes, b"AAAAAAAAAA");
}

#[tokio::test]
async fn s6_encrypted_folder_creation_generates_and_publishes_a_folder_key() {
	let dir = TempDir::new().unwrap();
	let server = MockServer::start().await;
	mock_token_endpoint(&server).await;

	fs::create_dir(dir.path().join("secret")).unwrap();
	fs::write(dir.path().join("secret/a.txt"), b"hello world").unwrap(); // 11 bytes
	fs::write(dir.path().join("secret/b.txt"), b"goodbye cruel world").unwrap(); // 19 bytes

	// No keyring on either side yet: open() generates a fresh pair and
	// publishes it to the remote user record.
	Mock::given(method("GET"))
		.and(path("/lox_api/user"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path("/lox_api/user"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	Mock::given(method("POST"))
		.and(path("/lox_api/operations/create_folder"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let set_key_bodies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
	let captured = set_key_bodies.clone();
	Mock::given(method("POST"))
		.and(path("/lox_api/key/secret"))
		.respond_with(move |req: &Request| {
			captured.lock().unwrap().push(String::from_utf8_lossy(&req.body).into_owned());
			ResponseTemplate::new(200)
		})
		.mount(&server)
		.await;

	// Freshly created folder, nothing uploaded to it yet.
	Mock::given(method("GET"))
		.and(path("/lox_api/meta/secret"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"is_dir": true,
			"modified_at": "2024-06-01T00:00:00Z",
			"children": [],
		})))
		.mount(&server)
		.await;

	let upload_bodies: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
	for name in ["a.txt", "b.txt"] {
		let captured = upload_bodies.clone();
		Mock::given(method("POST"))
			.and(path(format!("/lox_api/files/secret/{}", name)))
			.respond_with(move |req: &Request| {
				captured.lock().unwrap().push(req.body.len());
				ResponseTemplate::new(201)
			})
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path(format!("/lox_api/meta/secret/{}", name)))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"is_dir": false,
				"modified_at": "2024-06-01T00:05:00Z",
				"size": 16,
			})))
			.mount(&server)
			.await;
	}

	let mut engine = build_engine(&server, dir.path().to_path_buf(), dir.path().join("cache.redb"));
	engine.encrypt_default = true;
	let path = Path::new("secret", None);

	let local = engine.file_info_local(&path).unwrap();
	let remote = FileInfo::absent();
	let cached = engine.file_info_cache(&path).unwrap();
	assert_eq!(resolve(&local, &remote, &cached), Action::Upload);

	let mut queue = VecDeque::new();
	engine.run(path.clone(), Action::Upload, &mut queue).await.unwrap();

	// A folder key was generated and wrapped for the account's own user
	// (no `username` field, per `set_key(path, key, iv, user=None)`).
	let published = set_key_bodies.lock().unwrap();
	assert_eq!(published.len(), 1);
	assert!(!published[0].contains("username"));
	drop(published);

	// Both files enqueued by the folder walk resolve to Upload (new
	// locally, absent remotely, never cached) and inherit the folder key.
	assert_eq!(queue.len(), 2);
	for child in queue.iter() {
		assert!(child.is_encrypted());
	}
	let mut queue2 = VecDeque::new();
	while let Some(child) = queue.pop_front() {
		let local = engine.file_info_local(&child).unwrap();
		let cached = engine.file_info_cache(&child).unwrap();
		assert_eq!(resolve(&local, &FileInfo::absent(), &cached), Action::Upload);
		engine.run(child, Action::Upload, &mut queue2).await.unwrap();
	}

	// Ciphertext is the plaintext padded to a 16-byte multiple, never
	// shorter and never more than 16 bytes longer.
	let uploaded = upload_bodies.lock().unwrap();
	assert_eq!(uploaded.len(), 2);
	for &len in uploaded.iter() {
		assert_eq!(len % 16, 0);
	}
	assert!(uploaded.contains(&16)); // "hello world" (11 bytes) padded to 16
	assert!(uploaded.contains(&32)); // "goodbye cruel world" (19 bytes) padded to 32

	let folder_cached = engine.file_info_cache(&path).unwrap();
	assert!(!folder_cached.has_keys); // cache stores local truth, not remote has_keys
	assert_eq!(folder_cached.kind, lox_sync::model::Kind::Directory);
}
