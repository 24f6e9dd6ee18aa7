//! Splits a URL into scheme/host/port/path components.
//!
//! This is one of the "thin collaborators" the spec places out of the core
//! scheduler's scope, ported from `original_source/Url.cpp`'s hand-rolled
//! character scanner rather than pulled in as a dependency, since that is
//! what the original program does.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub userinfo: String,
    pub host: String,
    pub port: String,
    pub path: String,
    /// Named `query` to match the original scanner: its FRAGMENT-state
    /// branch stores the fragment span into `query` rather than a
    /// fragment field. The spec calls this out as an open question and
    /// says fragments are opaque and unused either way, so the behavior
    /// is kept verbatim rather than "fixed".
    pub query: String,
    pub fragment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Scheme,
    Userinfo,
    Host,
    Port,
    Path,
    Query,
    Fragment,
}

impl Url {
    /// Parses a URL. Never fails: unrecognized input simply yields empty
    /// components, which callers reject via `has_http_scheme`/`has_host`.
    pub fn parse(s: &str) -> Url {
        let bytes = s.as_bytes();
        let end = bytes.len();
        let mut state = State::Scheme;
        let mut token_start = 0usize;

        let mut scheme = (0usize, 0usize);
        let mut userinfo = (0usize, 0usize);
        let mut host = (0usize, 0usize);
        let mut port = (0usize, 0usize);
        let mut path = (0usize, 0usize);
        let mut query = (0usize, 0usize);
        let fragment = (0usize, 0usize);

        macro_rules! parse_noskip {
            ($elt:ident, $cursor:expr) => {{
                $elt = (token_start, $cursor - token_start);
                token_start = $cursor;
            }};
        }
        macro_rules! parse {
            ($elt:ident, $cursor:expr) => {{
                parse_noskip!($elt, $cursor);
                token_start += 1;
            }};
        }
        macro_rules! parse_end {
            ($elt:ident, $cursor:expr) => {{
                $elt = (token_start, $cursor - token_start + 1);
            }};
        }

        if end == 0 {
            return Url {
                scheme: String::new(),
                userinfo: String::new(),
                host: String::new(),
                port: String::new(),
                path: String::new(),
                query: String::new(),
                fragment: String::new(),
            };
        }

        // Mirrors the original's exact (and slightly overcautious) bounds
        // check: `token_start >= end - 2` bails to State::Path, so this
        // requires strictly more than two bytes left, not exactly two.
        let has_double_slash = |pos: usize| -> bool {
            pos + 2 < end && bytes[pos] == b'/' && bytes[pos + 1] == b'/'
        };

        // A plain `for cursor in 0..end` can't express the original scanner:
        // on a state transition it rewinds `cursor` back to `token_start` so
        // the newly-entered state re-examines bytes it hasn't looked at yet
        // (e.g. USERINFO falling through to HOST at end-of-string without
        // having seen '@'). So this is a manual loop with an explicit
        // `cursor += 1` standing in for the C for-loop's increment clause,
        // which still runs after such a mid-body reassignment.
        let mut cursor = 0usize;
        while cursor < end {
            let ch = bytes[cursor];
            match state {
                State::Scheme => {
                    if ch == b':' {
                        parse!(scheme, cursor);
                        if !has_double_slash(token_start) {
                            state = State::Path;
                            cursor = token_start;
                        } else {
                            state = State::Userinfo;
                            cursor = token_start;
                            token_start += 2;
                        }
                    } else if cursor == end - 1 {
                        if !has_double_slash(token_start) {
                            state = State::Path;
                            cursor = token_start;
                        } else {
                            state = State::Userinfo;
                            cursor = token_start;
                            token_start += 2;
                        }
                    }
                }
                State::Userinfo => {
                    if ch == b'@' {
                        parse!(userinfo, cursor);
                        state = State::Host;
                    } else if cursor == end - 1 {
                        state = State::Host;
                        cursor = token_start;
                    }
                }
                State::Host => {
                    if ch == b'/' {
                        parse_noskip!(host, cursor);
                        state = State::Path;
                    } else if cursor == end - 1 {
                        parse_end!(host, cursor);
                    } else if ch == b':' {
                        parse_noskip!(host, cursor);
                        state = State::Port;
                    }
                }
                State::Port => {
                    if ch == b'/' {
                        parse!(port, cursor);
                        state = State::Path;
                    } else if cursor == end - 1 {
                        parse_end!(port, cursor);
                    }
                }
                State::Path => {
                    if ch == b'?' {
                        parse!(path, cursor);
                        state = State::Query;
                    } else if ch == b'#' {
                        parse!(path, cursor);
                        state = State::Fragment;
                    } else if cursor == end - 1 {
                        parse_end!(path, cursor);
                    }
                }
                State::Query => {
                    if ch == b'#' {
                        parse!(query, cursor);
                        state = State::Fragment;
                    } else if cursor == end - 1 {
                        parse_end!(query, cursor);
                    }
                }
                State::Fragment => {
                    if cursor == end - 1 {
                        // Matches the original scanner: this branch labels
                        // the captured span `query`, not `fragment`.
                        parse_end!(query, cursor);
                    }
                }
            }
            cursor += 1;
        }

        let slice = |(off, len): (usize, usize)| s[off..off + len].to_string();
        Url {
            scheme: slice(scheme),
            userinfo: slice(userinfo),
            host: slice(host),
            port: slice(port),
            path: slice(path),
            query: slice(query),
            fragment: slice(fragment),
        }
    }

    pub fn is_http(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("http")
    }

    pub fn has_host(&self) -> bool {
        !self.host.is_empty()
    }

    /// Port as configured, defaulting to 80 when absent or unparsable.
    pub fn port_or_default(&self) -> u16 {
        if self.port.is_empty() {
            80
        } else {
            self.port.parse().unwrap_or(80)
        }
    }

    /// Path as configured, defaulting to `/` when absent.
    pub fn path_or_default(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path.clone()
        }
    }
}

#[cfg(test)]
mod test {
    use super::Url;

    #[test]
    fn plain_http_url() {
        let u = Url::parse("http://example.com/path/to/file");
        assert_eq!(u.scheme, "http");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.path, "/path/to/file");
        assert!(u.is_http());
        assert!(u.has_host());
        assert_eq!(u.port_or_default(), 80);
    }

    #[test]
    fn url_with_explicit_port() {
        let u = Url::parse("http://example.com:8080/file.bin");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, "8080");
        assert_eq!(u.port_or_default(), 8080);
        assert_eq!(u.path, "/file.bin");
    }

    #[test]
    fn url_without_path_defaults_to_slash() {
        let u = Url::parse("http://example.com");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.path, "");
        assert_eq!(u.path_or_default(), "/");
    }

    #[test]
    fn non_http_scheme_is_rejected_by_caller() {
        let u = Url::parse("ftp://example.com/file");
        assert!(!u.is_http());
    }

    #[test]
    fn url_with_query_string() {
        let u = Url::parse("http://example.com/file?x=1");
        assert_eq!(u.path, "/file");
        assert_eq!(u.query, "x=1");
    }

    #[test]
    fn fragment_branch_labels_span_as_query() {
        // Ported bug from the original scanner (see spec's Open Questions):
        // a bare fragment with no query component still lands in `.query`.
        let u = Url::parse("http://example.com/file#section");
        assert_eq!(u.path, "/file");
        assert_eq!(u.query, "section");
        assert_eq!(u.fragment, "");
    }

    #[test]
    fn scheme_without_authority_falls_back_to_path() {
        let u = Url::parse("mailto:foo@example.com");
        assert_eq!(u.scheme, "mailto");
        assert!(!u.has_host());
    }
}
