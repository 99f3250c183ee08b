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

//! Response helpers shared by the handlers.

use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use crate::rest::Error;
use crate::router::ResponseFuture;

/// 200 with a JSON body.
pub fn json_response<T: Serialize>(value: &T) -> ResponseFuture {
	let body = match serde_json::to_string_pretty(value) {
		Ok(json) => json,
		Err(_) => return response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failure"),
	};
	Box::pin(async move {
		Ok(Response::builder()
			.status(StatusCode::OK)
			.header("content-type", "application/json")
			.body(Body::from(body))
			.unwrap())
	})
}

/// An arbitrary status with a text body.
pub fn response(status: StatusCode, text: &str) -> ResponseFuture {
	let text = text.to_string();
	Box::pin(async move {
		Ok(Response::builder()
			.status(status)
			.body(Body::from(text))
			.unwrap())
	})
}

/// Map an API error onto the HTTP status taxonomy: client faults are
/// 4xx, core faults 5xx.
pub fn error_response(error: Error) -> ResponseFuture {
	let status = match error {
		Error::Argument(_) => StatusCode::BAD_REQUEST,
		Error::NotFound(_) => StatusCode::NOT_FOUND,
		Error::RequestError(_) => StatusCode::BAD_REQUEST,
		Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
	};
	response(status, &format!("{}", error))
}

/// Resolve a handler result into a response.
pub fn result_to_response<T: Serialize>(result: Result<T, Error>) -> ResponseFuture {
	match result {
		Ok(value) => json_response(&value),
		Err(error) => error_response(error),
	}
}
