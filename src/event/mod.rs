/// A single datagram from a DUT, classified by its ASCII prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Iteration {
        iterations: i64,
        kernel_time: f64,
        accumulated_time: f64,
    },
    Header,
    Begin,
    End,
    Info,
    Err,
    Sdc,
    Abort,
    /// An unrecognized prefix; carries the first 10 decoded characters for logging.
    Unknown { prefix: String },
}

#[derive(Clone, Copy)]
enum ParsedKind {
    Iteration,
    Header,
    Begin,
    End,
    Info,
    Err,
    Sdc,
    Abort,
}

const PREFIXES: &[(&str, ParsedKind)] = &[
    ("#IT", ParsedKind::Iteration),
    ("#HEADER", ParsedKind::Header),
    ("#BEGIN", ParsedKind::Begin),
    ("#END", ParsedKind::End),
    ("#INF", ParsedKind::Info),
    ("#ERR", ParsedKind::Err),
    ("#SDC", ParsedKind::Sdc),
    ("#ABORT", ParsedKind::Abort),
];

/// Decodes raw UDP datagrams into [`Event`]s. Stateless.
pub struct EventParser;

impl EventParser {
    /// Decodes `datagram` as ASCII (lossily, rather than rejecting the whole
    /// datagram on non-ASCII bytes), drops the reserved leading ECC marker byte,
    /// then matches the ordered ASCII-prefix table. `#IT` lines that fail to parse
    /// come back as `Unknown` rather than propagating an error: a single malformed
    /// datagram should never take down the caller's event loop.
    pub fn parse(datagram: &[u8]) -> Event {
        let body = if datagram.is_empty() {
            datagram
        } else {
            &datagram[1..]
        };
        let text = ascii_lossy(body);
        let text = text.trim_end_matches(['\r', '\n']);

        for (prefix, kind) in PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                return match kind {
                    ParsedKind::Iteration => parse_iteration(rest.trim()).unwrap_or_else(|| {
                        Event::Unknown {
                            prefix: first_n_chars(text, 10),
                        }
                    }),
                    ParsedKind::Header => Event::Header,
                    ParsedKind::Begin => Event::Begin,
                    ParsedKind::End => Event::End,
                    ParsedKind::Info => Event::Info,
                    ParsedKind::Err => Event::Err,
                    ParsedKind::Sdc => Event::Sdc,
                    ParsedKind::Abort => Event::Abort,
                };
            }
        }

        Event::Unknown {
            prefix: first_n_chars(text, 10),
        }
    }
}

/// `"{iter:int} KerTime:{ker:float} AccTime:{acc:float}"`
fn parse_iteration(rest: &str) -> Option<Event> {
    let mut parts = rest.split_whitespace();
    let iterations: i64 = parts.next()?.parse().ok()?;
    let kernel_time: f64 = parts.next()?.strip_prefix("KerTime:")?.parse().ok()?;
    let accumulated_time: f64 = parts.next()?.strip_prefix("AccTime:")?.parse().ok()?;

    Some(Event::Iteration {
        iterations,
        kernel_time,
        accumulated_time,
    })
}

fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect()
}

fn first_n_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
