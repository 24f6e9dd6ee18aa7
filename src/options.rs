//! CLI surface (spec.md §6). Out of the scheduler's core, but it is what
//! produces the `Options` that `Client` is built from.

use argparse::{ArgumentParser, List, Store, StoreOption, StoreTrue};

use crate::DEFAULT_USER_AGENT;

/// Parsed command line, ready to hand to `Client::run`.
#[derive(Debug, Clone)]
pub struct Options {
    pub output: Option<String>,
    pub user_agent: String,
    pub quiet: bool,
    pub verbose: bool,
    pub urls: Vec<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            output: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            quiet: false,
            verbose: false,
            urls: Vec::new(),
        }
    }
}

impl Options {
    /// Parses `std::env::args()`. A malformed command line prints usage to
    /// stderr and returns `None`; the caller exits with code 1 per spec.md
    /// §6 (argparse's own `--help` path still exits 0, which `main` lets
    /// through unchanged since it isn't a usage *error*).
    pub fn parse() -> Result<Options, i32> {
        let mut opts = Options::default();
        {
            let mut ap = ArgumentParser::new();
            ap.set_description(
                "Fetches one file from several mirror URLs at once using \
                 keep-alive HTTP/1.1 range requests.",
            );
            ap.refer(&mut opts.output).add_option(
                &["-o", "--output"],
                StoreOption,
                "Output file path (guessed from the first URL if omitted)",
            );
            ap.refer(&mut opts.user_agent).add_option(
                &["-u", "--user-agent"],
                Store,
                "User-Agent header value sent with every request",
            );
            ap.refer(&mut opts.quiet).add_option(
                &["-q", "--quiet"],
                StoreTrue,
                "Suppress the progress line",
            );
            ap.refer(&mut opts.verbose).add_option(
                &["-v", "--verbose"],
                StoreTrue,
                "Raise log verbosity (debug instead of info)",
            );
            ap.refer(&mut opts.urls).add_argument(
                "url",
                List,
                "Mirror URL(s) serving the same file",
            );
            match ap.parse_args() {
                Ok(()) => {}
                Err(0) => return Err(0),
                Err(_) => return Err(1),
            }
        }
        Ok(opts)
    }

    /// The output filename, either as given or guessed from the last path
    /// segment of the first URL (spec.md §6). `None` if neither exists.
    pub fn resolve_output_name(&self) -> Option<String> {
        if let Some(ref name) = self.output {
            return Some(name.clone());
        }
        let first = self.urls.first()?;
        let url = crate::url::Url::parse(first);
        let path = url.path_or_default();
        let guessed = path.rsplit('/').next().unwrap_or("");
        if guessed.is_empty() {
            None
        } else {
            Some(guessed.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::Options;

    #[test]
    fn guesses_output_name_from_first_url() {
        let opts = Options {
            urls: vec!["http://example.com/dir/file.iso".to_string()],
            ..Options::default()
        };
        assert_eq!(opts.resolve_output_name(), Some("file.iso".to_string()));
    }

    #[test]
    fn explicit_output_wins_over_guess() {
        let opts = Options {
            output: Some("out.bin".to_string()),
            urls: vec!["http://example.com/dir/file.iso".to_string()],
            ..Options::default()
        };
        assert_eq!(opts.resolve_output_name(), Some("out.bin".to_string()));
    }

    #[test]
    fn no_urls_and_no_output_is_unguessable() {
        let opts = Options::default();
        assert_eq!(opts.resolve_output_name(), None);
    }

    #[test]
    fn url_ending_in_slash_is_unguessable() {
        let opts = Options {
            urls: vec!["http://example.com/dir/".to_string()],
            ..Options::default()
        };
        assert_eq!(opts.resolve_output_name(), None);
    }
}
