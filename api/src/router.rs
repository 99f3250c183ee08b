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

//! Minimal path router: literal and `{param}` segments, one handler per
//! route, with an optional authentication middleware guarding every
//! dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hyper::{Body, Method, Request, Response, StatusCode};

use crate::auth::BasicAuthMiddleware;

/// The future every handler resolves a response through.
pub type ResponseFuture =
	Pin<Box<dyn Future<Output = Result<Response<Body>, hyper::Error>> + Send>>;

/// Path parameters captured while matching a route.
#[derive(Debug, Default, Clone)]
pub struct Params(HashMap<String, String>);

impl Params {
	/// The captured value of a `{name}` segment.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(|s| s.as_str())
	}
}

/// A route endpoint. Methods default to not-found so handlers only
/// implement the verbs they serve.
pub trait Handler: Send + Sync {
	/// Serve a GET request.
	fn get(&self, _req: Request<Body>, _params: Params) -> ResponseFuture {
		not_found()
	}

	/// Serve a POST request.
	fn post(&self, _req: Request<Body>, _params: Params) -> ResponseFuture {
		not_found()
	}

	/// Dispatch on the request method.
	fn call(&self, req: Request<Body>, params: Params) -> ResponseFuture {
		match *req.method() {
			Method::GET => self.get(req, params),
			Method::POST => self.post(req, params),
			_ => not_found(),
		}
	}
}

enum Segment {
	Literal(String),
	Param(String),
}

struct Route {
	segments: Vec<Segment>,
	handler: Arc<dyn Handler>,
}

/// The router: an ordered list of routes, first match wins.
#[derive(Clone)]
pub struct Router {
	routes: Arc<Vec<Route>>,
	auth: Option<Arc<BasicAuthMiddleware>>,
}

/// Builder for `Router`, collecting routes before freezing them behind
/// the shared reference the server clones per connection.
pub struct RouterBuilder {
	routes: Vec<Route>,
	auth: Option<Arc<BasicAuthMiddleware>>,
}

impl RouterBuilder {
	/// An empty builder.
	pub fn new() -> RouterBuilder {
		RouterBuilder {
			routes: vec![],
			auth: None,
		}
	}

	/// Register a handler under a route pattern such as
	/// `/v1/block/{id}`.
	pub fn add_route(mut self, pattern: &str, handler: Arc<dyn Handler>) -> RouterBuilder {
		let segments = pattern
			.split('/')
			.filter(|s| !s.is_empty())
			.map(|s| {
				if s.starts_with('{') && s.ends_with('}') {
					Segment::Param(s[1..s.len() - 1].to_string())
				} else {
					Segment::Literal(s.to_string())
				}
			})
			.collect();
		self.routes.push(Route { segments, handler });
		self
	}

	/// Guard every route behind the given authentication middleware.
	pub fn with_auth(mut self, auth: Option<Arc<BasicAuthMiddleware>>) -> RouterBuilder {
		self.auth = auth;
		self
	}

	/// Freeze the builder into a dispatchable router.
	pub fn build(self) -> Router {
		Router {
			routes: Arc::new(self.routes),
			auth: self.auth,
		}
	}
}

impl Router {
	fn find(&self, path: &str) -> Option<(Arc<dyn Handler>, Params)> {
		let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
		'route: for route in self.routes.iter() {
			if route.segments.len() != segments.len() {
				continue;
			}
			let mut params = HashMap::new();
			for (pattern, actual) in route.segments.iter().zip(segments.iter()) {
				match pattern {
					Segment::Literal(lit) => {
						if lit != actual {
							continue 'route;
						}
					}
					Segment::Param(name) => {
						params.insert(name.clone(), actual.to_string());
					}
				}
			}
			return Some((route.handler.clone(), Params(params)));
		}
		None
	}

	/// Dispatch a request to the matching handler, behind the auth
	/// middleware when one is configured.
	pub fn handle(&self, req: Request<Body>) -> ResponseFuture {
		if let Some(auth) = &self.auth {
			if let Err(response) = auth.check(&req) {
				return Box::pin(async { Ok(response) });
			}
		}
		match self.find(req.uri().path()) {
			Some((handler, params)) => handler.call(req, params),
			None => not_found(),
		}
	}
}

/// A plain 404 response future.
pub fn not_found() -> ResponseFuture {
	Box::pin(async {
		Ok(Response::builder()
			.status(StatusCode::NOT_FOUND)
			.body(Body::empty())
			.unwrap())
	})
}

#[cfg(test)]
mod test {
	use super::*;

	struct Probe(&'static str);
	impl Handler for Probe {
		fn get(&self, _req: Request<Body>, params: Params) -> ResponseFuture {
			let body = format!("{}:{}", self.0, params.get("id").unwrap_or("-"));
			Box::pin(async move { Ok(Response::new(Body::from(body))) })
		}
	}

	fn req(path: &str) -> Request<Body> {
		Request::builder().uri(path).body(Body::empty()).unwrap()
	}

	async fn body_of(res: Response<Body>) -> String {
		let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
		String::from_utf8(bytes.to_vec()).unwrap()
	}

	#[tokio::test]
	async fn literal_and_param_matching() {
		let router = RouterBuilder::new()
			.add_route("/v1/info", Arc::new(Probe("info")))
			.add_route("/v1/block/{id}", Arc::new(Probe("block")))
			.build();

		let res = router.handle(req("/v1/info")).await.unwrap();
		assert_eq!(body_of(res).await, "info:-");

		let res = router.handle(req("/v1/block/42")).await.unwrap();
		assert_eq!(body_of(res).await, "block:42");

		let res = router.handle(req("/v1/missing")).await.unwrap();
		assert_eq!(res.status(), StatusCode::NOT_FOUND);
	}
}
