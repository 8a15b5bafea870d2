//! Flat route table and path matcher.
//!
//! Templates are `/`-separated sequences of literal segments, `:name`
//! placeholders that capture one non-empty segment, and an optional trailing
//! `*` that captures the rest of the path. Routes are tried in registration
//! order and the first match wins, so more specific templates must be
//! registered before general ones that share a prefix.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Path parameter key under which a trailing `*` stores the remainder.
pub const WILDCARD_PARAM: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 4] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route already registered: {0} {1}")]
    Duplicate(HttpMethod, String),
    #[error("invalid uri template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },
}

/// Result of a successful match: the command and its captured path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub command: String,
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// No resource exists at this path.
    NotFound,
    /// The resource exists but does not accept this method.
    MethodNotAllowed(Vec<HttpMethod>),
}

/// Resolves a request method and path to a command.
///
/// Implemented by [`RouteTable`] and by [`crate::resource::ResourceTree`].
pub trait CommandMatcher: Send + Sync {
    fn match_request(&self, method: HttpMethod, path: &str) -> Result<RouteMatch, MatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// Split a request path or template into segments.
///
/// One leading and one trailing slash are ignored; interior empty segments
/// are kept so that `//` never satisfies a placeholder.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/').collect()
}

/// Percent-decode one captured path segment. Invalid UTF-8 is replaced
/// rather than rejected.
pub(crate) fn decode_segment(segment: &str) -> String {
    percent_encoding::percent_decode_str(segment)
        .decode_utf8_lossy()
        .into_owned()
}

/// A parsed URI template such as `/session/:sessionId/element/:id/text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let parts = split_path(template);
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == WILDCARD_PARAM {
                if i + 1 != parts.len() {
                    return Err(invalid("wildcard must be the last segment"));
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(invalid("placeholder without a name"));
                }
                if segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name))
                {
                    return Err(invalid("placeholder name used twice"));
                }
                Segment::Param(name.to_string())
            } else if part.is_empty() {
                return Err(invalid("empty segment"));
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Two templates have the same shape when they match exactly the same
    /// paths, whatever their placeholders are called.
    pub fn same_shape(&self, other: &UriTemplate) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    (Segment::Wildcard, Segment::Wildcard) => true,
                    _ => false,
                })
    }

    /// Match path segments left to right, returning captured parameters.
    /// Literals compare against the raw segment; captures are percent-decoded.
    pub fn captures(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut rest = path;
        for segment in &self.segments {
            match segment {
                Segment::Wildcard => {
                    let tail: Vec<String> = rest.iter().map(|s| decode_segment(s)).collect();
                    params.insert(WILDCARD_PARAM.to_string(), tail.join("/"));
                    return Some(params);
                }
                Segment::Literal(lit) => {
                    let (head, tail) = rest.split_first()?;
                    if *head != lit.as_str() {
                        return None;
                    }
                    rest = tail;
                }
                Segment::Param(name) => {
                    let (head, tail) = rest.split_first()?;
                    if head.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode_segment(head));
                    rest = tail;
                }
            }
        }
        rest.is_empty().then_some(params)
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub method: HttpMethod,
    pub template: UriTemplate,
    pub command: String,
}

/// Ordered collection of routes, read-only once the server starts.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Fails if the `(method, template)` pair already exists.
    pub fn add(
        &mut self,
        method: HttpMethod,
        template: &str,
        command: impl Into<String>,
    ) -> Result<(), RouteError> {
        let template = UriTemplate::parse(template)?;
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.template.same_shape(&template))
        {
            return Err(RouteError::Duplicate(method, template.as_str().to_string()));
        }
        self.routes.push(Route {
            method,
            template,
            command: command.into(),
        });
        Ok(())
    }

    /// Build a table from `(method, template, command)` triples in order.
    pub fn from_routes(routes: &[(HttpMethod, &str, &str)]) -> Result<Self, RouteError> {
        let mut table = Self::new();
        for (method, template, command) in routes {
            table.add(*method, template, *command)?;
        }
        Ok(table)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl CommandMatcher for RouteTable {
    fn match_request(&self, method: HttpMethod, path: &str) -> Result<RouteMatch, MatchError> {
        let segments = split_path(path);
        let mut allowed = Vec::new();
        for route in &self.routes {
            let Some(params) = route.template.captures(&segments) else {
                continue;
            };
            if route.method == method {
                return Ok(RouteMatch {
                    command: route.command.clone(),
                    params,
                });
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method);
            }
        }
        if allowed.is_empty() {
            Err(MatchError::NotFound)
        } else {
            Err(MatchError::MethodNotAllowed(allowed))
        }
    }
}

use HttpMethod::{Delete, Get, Post};

/// The JSON Wire Protocol command set, most specific templates first.
pub const WIRE_ROUTES: &[(HttpMethod, &str, &str)] = &[
    (Get, "/status", "status"),
    (Post, "/session", "newSession"),
    (Get, "/sessions", "getSessions"),
    (Get, "/session/:sessionId", "getSessionCapabilities"),
    (Delete, "/session/:sessionId", "quit"),
    (Post, "/session/:sessionId/timeouts", "setTimeouts"),
    (Post, "/session/:sessionId/timeouts/implicit_wait", "implicitlyWait"),
    (Post, "/session/:sessionId/timeouts/async_script", "setScriptTimeout"),
    (Get, "/session/:sessionId/window_handle", "getWindowHandle"),
    (Get, "/session/:sessionId/window_handles", "getWindowHandles"),
    (Post, "/session/:sessionId/window", "switchToWindow"),
    (Delete, "/session/:sessionId/window", "close"),
    (Post, "/session/:sessionId/frame", "switchToFrame"),
    (Get, "/session/:sessionId/url", "getCurrentUrl"),
    (Post, "/session/:sessionId/url", "get"),
    (Post, "/session/:sessionId/back", "goBack"),
    (Post, "/session/:sessionId/forward", "goForward"),
    (Post, "/session/:sessionId/refresh", "refresh"),
    (Get, "/session/:sessionId/title", "getTitle"),
    (Get, "/session/:sessionId/source", "getPageSource"),
    (Post, "/session/:sessionId/execute", "executeScript"),
    (Post, "/session/:sessionId/execute_async", "executeAsyncScript"),
    (Get, "/session/:sessionId/screenshot", "screenshot"),
    (Get, "/session/:sessionId/cookie", "getCookies"),
    (Post, "/session/:sessionId/cookie", "addCookie"),
    (Delete, "/session/:sessionId/cookie", "deleteAllCookies"),
    (Delete, "/session/:sessionId/cookie/:name", "deleteCookie"),
    (Post, "/session/:sessionId/element", "findElement"),
    (Post, "/session/:sessionId/elements", "findElements"),
    (Post, "/session/:sessionId/element/active", "getActiveElement"),
    (Get, "/session/:sessionId/element/:id", "describeElement"),
    (Post, "/session/:sessionId/element/:id/element", "findChildElement"),
    (Post, "/session/:sessionId/element/:id/elements", "findChildElements"),
    (Post, "/session/:sessionId/element/:id/click", "clickElement"),
    (Post, "/session/:sessionId/element/:id/submit", "submitElement"),
    (Get, "/session/:sessionId/element/:id/text", "getElementText"),
    (Post, "/session/:sessionId/element/:id/value", "sendKeysToElement"),
    (Get, "/session/:sessionId/element/:id/name", "getElementTagName"),
    (Post, "/session/:sessionId/element/:id/clear", "clearElement"),
    (Get, "/session/:sessionId/element/:id/selected", "isElementSelected"),
    (Get, "/session/:sessionId/element/:id/enabled", "isElementEnabled"),
    (Get, "/session/:sessionId/element/:id/displayed", "isElementDisplayed"),
    (Get, "/session/:sessionId/element/:id/attribute/:name", "getElementAttribute"),
    (Get, "/session/:sessionId/element/:id/equals/:other", "elementEquals"),
    (Get, "/session/:sessionId/element/:id/location", "getElementLocation"),
    (Get, "/session/:sessionId/element/:id/size", "getElementSize"),
    (Get, "/session/:sessionId/element/:id/css/:propertyName", "getElementValueOfCssProperty"),
];

/// The standard JSON Wire route table.
pub fn wire_routes() -> Result<RouteTable, RouteError> {
    RouteTable::from_routes(WIRE_ROUTES)
}
