//! Paged history results.
//!
//! History and presence queries come back one page at a time. The page
//! size is whatever `limit` the request asked for, and links to the
//! neighbouring pages arrive in the response's `Link` header:
//!
//! ```text
//! Link: <./messages?start=0&limit=100&p=ZXlK>; rel="next", <./messages?limit=100>; rel="first"
//! ```

use std::collections::BTreeMap;

use tidewire_protocol::Protocol;

use crate::ChannelOptions;

/// Page size used when the request doesn't carry a usable `limit`.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// An outgoing history/presence request, as far as paging cares.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Used to decode the payloads in the response.
    pub channel_options: ChannelOptions,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_channel_options(mut self, options: ChannelOptions) -> Self {
        self.channel_options = options;
        self
    }

    /// The requested page size.
    ///
    /// Absent, empty, non-numeric and zero limits all fall back to
    /// [`DEFAULT_QUERY_LIMIT`].
    pub fn limit(&self) -> usize {
        self.query
            .get("limit")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&limit| limit > 0)
            .unwrap_or(DEFAULT_QUERY_LIMIT)
    }
}

/// A response body plus the headers paging needs.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            content_type: Some(content_type.into()),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The body's wire format, from its content type. Anything that isn't
    /// MessagePack is read as JSON.
    pub fn format(&self) -> Protocol {
        match &self.content_type {
            Some(ct) if ct.contains("msgpack") => Protocol::MsgPack,
            _ => Protocol::Json,
        }
    }
}

/// One entry of a `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub rel: String,
    /// Path relative to the original request, `./` stripped.
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl PageLink {
    /// Parses a full `Link` header value into its entries.
    ///
    /// Entries that don't look like `<target>; rel="name"` are skipped.
    pub fn parse_header(header: &str) -> Vec<PageLink> {
        header.split(',').filter_map(Self::parse_entry).collect()
    }

    fn parse_entry(entry: &str) -> Option<PageLink> {
        let mut parts = entry.split(';');
        let target = parts
            .next()?
            .trim()
            .strip_prefix('<')?
            .strip_suffix('>')?;

        let rel = parts.find_map(|param| {
            let (key, value) = param.split_once('=')?;
            (key.trim() == "rel").then(|| value.trim().trim_matches('"').to_owned())
        })?;

        let target = target.strip_prefix("./").unwrap_or(target);
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        Some(PageLink {
            rel,
            path: path.to_owned(),
            query,
        })
    }

    /// A request for the linked page, carrying over the original's
    /// headers and channel options.
    pub fn to_request(&self, original: &HttpRequest) -> HttpRequest {
        let path = match original.path.rsplit_once('/') {
            Some((base, _)) => format!("{base}/{}", self.path),
            None => self.path.clone(),
        };
        HttpRequest {
            path,
            query: self.query.clone(),
            headers: original.headers.clone(),
            channel_options: original.channel_options.clone(),
        }
    }
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub limit: usize,
    pub first: Option<PageLink>,
    pub current: Option<PageLink>,
    pub next: Option<PageLink>,
}

impl<T> PaginatedResult<T> {
    /// Wraps already-decoded `items`, capping them at the request's limit
    /// and reading page links from the response.
    pub fn new(request: &HttpRequest, response: &HttpResponse, mut items: Vec<T>) -> Self {
        let limit = request.limit();
        if items.len() > limit {
            tracing::debug!(received = items.len(), limit, "truncating page to limit");
            items.truncate(limit);
        }

        let mut page = Self {
            items,
            limit,
            first: None,
            current: None,
            next: None,
        };
        if let Some(header) = response.header("link") {
            for link in PageLink::parse_header(header) {
                match link.rel.as_str() {
                    "first" => page.first = Some(link),
                    "current" => page.current = Some(link),
                    "next" => page.next = Some(link),
                    _ => {}
                }
            }
        }
        page
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    /// The request that fetches the next page, if there is one.
    pub fn next_request(&self, original: &HttpRequest) -> Option<HttpRequest> {
        self.next.as_ref().map(|link| link.to_request(original))
    }

    /// The request that fetches the first page, if the service linked it.
    pub fn first_request(&self, original: &HttpRequest) -> Option<HttpRequest> {
        self.first.as_ref().map(|link| link.to_request(original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_parsing() {
        assert_eq!(HttpRequest::get("/x").limit(), DEFAULT_QUERY_LIMIT);
        assert_eq!(HttpRequest::get("/x").with_query("limit", "").limit(), 100);
        assert_eq!(HttpRequest::get("/x").with_query("limit", "abc").limit(), 100);
        assert_eq!(HttpRequest::get("/x").with_query("limit", "0").limit(), 100);
        assert_eq!(HttpRequest::get("/x").with_query("limit", "-5").limit(), 100);
        assert_eq!(HttpRequest::get("/x").with_query("limit", "25").limit(), 25);
    }

    #[test]
    fn test_parse_link_header() {
        let links = PageLink::parse_header(
            r#"<./messages?start=0&limit=2&p=ZXlK%3D>; rel="next", <./messages?limit=2>; rel="first""#,
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].rel, "next");
        assert_eq!(links[0].path, "messages");
        assert_eq!(links[0].query.get("p").map(String::as_str), Some("ZXlK="));
        assert_eq!(links[0].query.get("limit").map(String::as_str), Some("2"));
        assert_eq!(links[1].rel, "first");
    }

    #[test]
    fn test_malformed_link_entries_are_skipped() {
        let links = PageLink::parse_header(r#"garbage, <./a?x=1>; rel="next", <./b>"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path, "a");
    }

    #[test]
    fn test_page_caps_items_and_reads_links() {
        let request = HttpRequest::get("/channels/news/messages").with_query("limit", "2");
        let response = HttpResponse::new(200, "application/json", "[]").with_header(
            "Link",
            r#"<./messages?limit=2&p=abc>; rel="next""#,
        );
        let page = PaginatedResult::new(&request, &response, vec![1, 2, 3]);

        assert_eq!(page.items, vec![1, 2]);
        assert!(page.has_next());
        assert!(!page.is_last());

        let next = page.next_request(&request).unwrap();
        assert_eq!(next.path, "/channels/news/messages");
        assert_eq!(next.query.get("p").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_page_without_link_is_last() {
        let request = HttpRequest::get("/channels/news/messages");
        let response = HttpResponse::new(200, "application/json", "[]");
        let page: PaginatedResult<u8> = PaginatedResult::new(&request, &response, Vec::new());
        assert!(page.is_last());
        assert_eq!(page.limit, DEFAULT_QUERY_LIMIT);
        assert!(page.next_request(&request).is_none());
    }

    #[test]
    fn test_response_format_from_content_type() {
        assert_eq!(
            HttpResponse::new(200, "application/x-msgpack", Vec::new()).format(),
            Protocol::MsgPack
        );
        assert_eq!(
            HttpResponse::new(200, "application/json; charset=utf-8", Vec::new()).format(),
            Protocol::Json
        );
    }
}
