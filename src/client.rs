//! Typed facade over the remote store's HTTP JSON API
//!
//! One `RemoteClient` per account; owns a `reqwest::Client` and a
//! `TokenAuth` that refreshes the bearer token proactively before expiry.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ClientError;

const AGENT_HEADER: &str = "lox-client";
const TOKEN_REFRESH_SKEW: Duration = Duration::from_secs(10);

/// Bearer-token authentication with proactive refresh.
///
/// Mirrors `Localbox.header()`'s "invalidate 10 seconds before" behavior:
/// the token is refetched once `Instant::now() + TOKEN_REFRESH_SKEW` would
/// cross `expires_at`, rather than waiting for an outright 401.
struct TokenAuth {
	http: reqwest::Client,
	token_url: String,
	client_id: String,
	client_secret: String,
	username: String,
	password: String,
	state: Mutex<Option<TokenState>>,
}

struct TokenState {
	access_token: String,
	expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
	expires_in: u64,
}

impl TokenAuth {
	async fn header(&self) -> Result<(String, String), ClientError> {
		let needs_refresh = {
			let guard = self.state.lock().unwrap();
			match guard.as_ref() {
				Some(state) => Instant::now() + TOKEN_REFRESH_SKEW >= state.expires_at,
				None => true,
			}
		};

		if needs_refresh {
			self.refresh().await?;
		}

		let guard = self.state.lock().unwrap();
		let token = &guard.as_ref().expect("refreshed above").access_token;
		Ok(("Authorization".to_string(), format!("Bearer {}", token)))
	}

	async fn refresh(&self) -> Result<(), ClientError> {
		let resp = self
			.http
			.get(&self.token_url)
			.query(&[
				("grant_type", "password"),
				("client_id", &self.client_id),
				("client_secret", &self.client_secret),
				("username", &self.username),
				("password", &self.password),
			])
			.send()
			.await?;

		if resp.status() != reqwest::StatusCode::OK {
			return Err(ClientError::Fatal {
				message: format!("authentication failed: {}", resp.status()),
			});
		}

		let body: TokenResponse = resp.json().await?;
		let expires_at = Instant::now() + Duration::from_secs(body.expires_in);
		*self.state.lock().unwrap() = Some(TokenState { access_token: body.access_token, expires_at });
		Ok(())
	}
}

/// Parsed `{is_dir, modified_at, size, children?, has_keys?, is_share?}` response.
#[derive(Debug, Deserialize)]
pub struct MetaResponse {
	pub is_dir: bool,
	pub modified_at: String,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub children: Option<Vec<ChildMeta>>,
	#[serde(default)]
	pub has_keys: bool,
	#[serde(default)]
	pub is_share: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChildMeta {
	pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyResponse {
	pub key: String,
	pub iv: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
	pub public_key: Option<String>,
	pub private_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Invitation {
	pub id: String,
	pub share: InvitationShare,
}

#[derive(Debug, Deserialize)]
pub struct InvitationShare {
	pub item: InvitationItem,
}

#[derive(Debug, Deserialize)]
pub struct InvitationItem {
	pub path: String,
}

#[derive(Serialize)]
struct SetKeyBody<'a> {
	key: &'a str,
	iv: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	username: Option<&'a str>,
}

/// Request-scoped facade over one account's remote object store.
pub struct RemoteClient {
	http: reqwest::Client,
	base_url: String,
	auth: TokenAuth,
}

impl RemoteClient {
	pub fn new(
		base_url: impl Into<String>,
		token_url: impl Into<String>,
		username: impl Into<String>,
		password: impl Into<String>,
		verify_tls: bool,
	) -> Result<Self, ClientError> {
		let http = reqwest::Client::builder()
			.danger_accept_invalid_certs(!verify_tls)
			.build()?;

		// Localbox's own OAuth2 client credentials; these are not secrets in
		// the sense of identifying a single tenant, just the app registration.
		let client_id = "32yqjbq9u38koggk040w408cccss8og4c0ckso4sgoocwgkkoc".to_string();
		let client_secret = "4j8jqubjrbi8wwsk0ocowooggkc44wcw0044skgscg4o4o44s4".to_string();

		Ok(RemoteClient {
			http: http.clone(),
			base_url: base_url.into(),
			auth: TokenAuth {
				http,
				token_url: token_url.into(),
				client_id,
				client_secret,
				username: username.into(),
				password: password.into(),
				state: Mutex::new(None),
			},
		})
	}

	fn url(&self, segment: &str, path: &str) -> String {
		format!("{}/lox_api/{}/{}", self.base_url.trim_end_matches('/'), segment, encode_path(path))
	}

	async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ClientError> {
		let (name, value) = self.auth.header().await?;
		Ok(builder.header(name, value).header("Agent", AGENT_HEADER))
	}

	/// `meta(path)`: drives both directory listing and post-upload timestamp pull.
	pub async fn meta(&self, path: &str) -> Result<Option<MetaResponse>, ClientError> {
		let req = self.authed(self.http.get(self.url("meta", path))).await?;
		let resp = req.send().await?;
		match resp.status() {
			reqwest::StatusCode::OK => Ok(Some(resp.json().await?)),
			reqwest::StatusCode::NOT_FOUND => Ok(None),
			status => Err(ClientError::Protocol { message: format!("meta: unexpected status {}", status) }),
		}
	}

	pub async fn download(&self, path: &str) -> Result<Vec<u8>, ClientError> {
		let req = self.authed(self.http.get(self.url("files", path))).await?;
		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("download", resp.status()));
		}
		Ok(resp.bytes().await?.to_vec())
	}

	pub async fn upload(&self, path: &str, content_type: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
		let req = self.authed(self.http.post(self.url("files", path))).await?;
		let resp = req
			.header("Content-Type", content_type)
			.body(bytes)
			.send()
			.await?;
		if resp.status() != reqwest::StatusCode::CREATED {
			return Err(status_error("upload", resp.status()));
		}
		Ok(())
	}

	pub async fn create_folder(&self, path: &str) -> Result<(), ClientError> {
		let url = format!("{}/lox_api/operations/create_folder", self.base_url.trim_end_matches('/'));
		let req = self.authed(self.http.post(url)).await?;
		let resp = req
			.header("Content-Type", "application/x-www-form-urlencoded")
			.body(format!("path={}", encode_path(path)))
			.send()
			.await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("create_folder", resp.status()));
		}
		Ok(())
	}

	pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
		let url = format!("{}/lox_api/operations/delete", self.base_url.trim_end_matches('/'));
		let req = self.authed(self.http.post(url)).await?;
		let resp = req
			.header("Content-Type", "application/x-www-form-urlencoded")
			.body(format!("path={}", encode_path(path)))
			.send()
			.await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("delete", resp.status()));
		}
		Ok(())
	}

	pub async fn get_key(&self, path: &str) -> Result<KeyResponse, ClientError> {
		let req = self.authed(self.http.get(self.url("key", path))).await?;
		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("get_key", resp.status()));
		}
		Ok(resp.json().await?)
	}

	pub async fn set_key(
		&self,
		path: &str,
		wrapped_key: &str,
		wrapped_iv: &str,
		user: Option<&str>,
	) -> Result<(), ClientError> {
		let req = self.authed(self.http.post(self.url("key", path))).await?;
		let body = SetKeyBody { key: wrapped_key, iv: wrapped_iv, username: user };
		let resp = req.json(&body).send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("set_key", resp.status()));
		}
		Ok(())
	}

	pub async fn key_revoke(&self, path: &str, user: &str) -> Result<(), ClientError> {
		let req = self.authed(self.http.post(self.url("key_revoke", path))).await?;
		let resp = req.json(&serde_json::json!({ "username": user })).send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("key_revoke", resp.status()));
		}
		Ok(())
	}

	pub async fn invitations(&self) -> Result<Vec<Invitation>, ClientError> {
		let url = format!("{}/lox_api/invitations", self.base_url.trim_end_matches('/'));
		let req = self.authed(self.http.get(url)).await?;
		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("invitations", resp.status()));
		}
		Ok(resp.json().await?)
	}

	pub async fn invite_revoke(&self, reference: &str) -> Result<(), ClientError> {
		let url = format!("{}/lox_api/invite/{}/revoke", self.base_url.trim_end_matches('/'), reference);
		let req = self.authed(self.http.post(url)).await?;
		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("invite_revoke", resp.status()));
		}
		Ok(())
	}

	pub async fn get_user_info(&self, name: Option<&str>) -> Result<UserInfo, ClientError> {
		let mut url = format!("{}/lox_api/user", self.base_url.trim_end_matches('/'));
		if let Some(name) = name {
			url.push('/');
			url.push_str(name);
		}
		let req = self.authed(self.http.get(url)).await?;
		let resp = req.send().await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("get_user_info", resp.status()));
		}
		Ok(resp.json().await?)
	}

	pub async fn set_user_info(
		&self,
		public_key: &str,
		private_key: &str,
		_user: Option<&str>,
	) -> Result<(), ClientError> {
		let url = format!("{}/lox_api/user", self.base_url.trim_end_matches('/'));
		let req = self.authed(self.http.post(url)).await?;
		let resp = req
			.json(&serde_json::json!({ "public_key": public_key, "private_key": private_key }))
			.send()
			.await?;
		if resp.status() != reqwest::StatusCode::OK {
			return Err(status_error("set_user_info", resp.status()));
		}
		Ok(())
	}
}

fn status_error(op: &str, status: reqwest::StatusCode) -> ClientError {
	match status {
		reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
			ClientError::Auth { message: format!("{}: {}", op, status) }
		}
		reqwest::StatusCode::NOT_FOUND => ClientError::NotFound { path: op.to_string() },
		_ => ClientError::Protocol { message: format!("{}: unexpected status {}", op, status) },
	}
}

/// Percent-encode each path segment, preserving `/` as a separator, mirroring
/// `urllib.pathname2url`'s per-segment encoding used throughout the original client.
fn encode_path(path: &str) -> String {
	path.split('/')
		.map(|segment| percent_encode_segment(segment))
		.collect::<Vec<_>>()
		.join("/")
}

fn percent_encode_segment(segment: &str) -> String {
	let mut out = String::with_capacity(segment.len());
	for byte in segment.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
			_ => out.push_str(&format!("%{:02X}", byte)),
		}
	}
	out
}


// vim: ts=4
