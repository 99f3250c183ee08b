// Copyright 2019 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Basic authentication middleware. The expected credential is kept as
//! a SHA-256 digest and presented headers are compared digest-to-digest
//! in constant time.

use hyper::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use hyper::{Body, Method, Request, Response, StatusCode};
use ring::constant_time::verify_slices_are_equal;
use ring::digest;

const KESTREL_BASIC_REALM: &str = "Basic realm=KestrelAPI";

/// Basic Authentication Middleware
pub struct BasicAuthMiddleware {
	api_basic_auth_digest: Vec<u8>,
	basic_realm: String,
}

impl BasicAuthMiddleware {
	/// Middleware expecting the `kestrel:<secret>` credential.
	pub fn new(api_secret: &str) -> BasicAuthMiddleware {
		let header_value = format!(
			"Basic {}",
			base64::encode(&format!("kestrel:{}", api_secret))
		);
		BasicAuthMiddleware {
			api_basic_auth_digest: sha256(header_value.as_bytes()),
			basic_realm: KESTREL_BASIC_REALM.to_string(),
		}
	}

	/// Let the request through or produce the 401 to answer with.
	pub fn check(&self, req: &Request<Body>) -> Result<(), Response<Body>> {
		if req.method() == Method::OPTIONS {
			return Ok(());
		}
		if let Some(header) = req.headers().get(AUTHORIZATION) {
			let presented = sha256(header.as_bytes());
			if verify_slices_are_equal(&presented, &self.api_basic_auth_digest).is_ok() {
				return Ok(());
			}
		}
		Err(unauthorized_response(&self.basic_realm))
	}
}

fn sha256(data: &[u8]) -> Vec<u8> {
	digest::digest(&digest::SHA256, data).as_ref().to_vec()
}

fn unauthorized_response(basic_realm: &str) -> Response<Body> {
	Response::builder()
		.status(StatusCode::UNAUTHORIZED)
		.header(
			WWW_AUTHENTICATE,
			HeaderValue::from_str(basic_realm).unwrap(),
		)
		.body(Body::empty())
		.unwrap()
}

#[cfg(test)]
mod test {
	use super::*;

	fn request_with(auth: Option<&str>) -> Request<Body> {
		let mut builder = Request::builder().uri("/v1/info");
		if let Some(value) = auth {
			builder = builder.header(AUTHORIZATION, value);
		}
		builder.body(Body::empty()).unwrap()
	}

	#[test]
	fn accepts_correct_secret_only() {
		let middleware = BasicAuthMiddleware::new("hunter2");
		let good = format!("Basic {}", base64::encode("kestrel:hunter2"));
		assert!(middleware.check(&request_with(Some(&good))).is_ok());

		let bad = format!("Basic {}", base64::encode("kestrel:hunter3"));
		assert!(middleware.check(&request_with(Some(&bad))).is_err());
		assert!(middleware.check(&request_with(None)).is_err());
	}
}
