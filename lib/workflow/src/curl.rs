//! Interpretation of pasted curl commands for HTTP nodes.
//!
//! Operators often configure an HTTP node by pasting the curl command they
//! already use. Only the request shape is extracted: URL, method, headers and
//! body. Transport flags are skipped.

use crate::error::ConfigurationError;
use std::collections::BTreeMap;

/// Body flags, most preferred first.
const BODY_FLAGS: [&str; 6] = [
    "--data-raw",
    "--data-binary",
    "--data",
    "-d",
    "--data-ascii",
    "--json",
];

/// Flags whose value must be skipped along with the flag.
const FLAGS_WITH_VALUE: [&str; 18] = [
    "-u",
    "--user",
    "-A",
    "--user-agent",
    "-e",
    "--referer",
    "-b",
    "--cookie",
    "-o",
    "--output",
    "-m",
    "--max-time",
    "--connect-timeout",
    "-F",
    "--form",
    "--retry",
    "-x",
    "--proxy",
];

/// The request shape extracted from a curl command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlRequest {
    /// Target URL.
    pub url: String,
    /// Upper-cased HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body, if a data flag was present.
    pub body: Option<String>,
}

/// Parses a curl command line.
///
/// # Errors
///
/// Returns an error if the command is empty, has an unterminated quote, a
/// flag is missing its value, or no URL can be found.
pub fn parse_curl(command: &str) -> Result<CurlRequest, ConfigurationError> {
    let tokens = tokenize(command)?;
    if tokens.is_empty() {
        return Err(invalid("command is empty"));
    }

    let mut args = tokens.iter().peekable();
    if args.peek().is_some_and(|first| first.as_str() == "curl") {
        args.next();
    }

    let mut url: Option<String> = None;
    let mut method: Option<String> = None;
    let mut headers = BTreeMap::new();
    let mut bodies: Vec<(usize, String)> = Vec::new();
    let mut json_body = false;

    while let Some(arg) = args.next() {
        let flag = arg.as_str();
        match flag {
            "-X" | "--request" => {
                method = Some(flag_value(&mut args, flag)?.to_ascii_uppercase());
            }
            "-H" | "--header" => {
                let header = flag_value(&mut args, flag)?;
                if let Some((name, value)) = header.split_once(':') {
                    let name = name.trim();
                    if !name.is_empty() {
                        headers.insert(name.to_string(), value.trim().to_string());
                    }
                }
            }
            "--url" => url = Some(flag_value(&mut args, flag)?.to_string()),
            _ if BODY_FLAGS.contains(&flag) => {
                let value = flag_value(&mut args, flag)?;
                let rank = BODY_FLAGS.iter().position(|f| *f == flag).unwrap_or(0);
                bodies.push((rank, value.to_string()));
                json_body |= flag == "--json";
            }
            _ if flag.starts_with("-X") && flag.len() > 2 => {
                method = Some(flag[2..].to_ascii_uppercase());
            }
            _ if FLAGS_WITH_VALUE.contains(&flag) => {
                flag_value(&mut args, flag)?;
            }
            _ if flag.starts_with('-') => {}
            _ => {
                if url.is_none() {
                    url = Some(arg.clone());
                }
            }
        }
    }

    let url = url
        .or_else(|| {
            tokens
                .iter()
                .find(|t| t.starts_with("http://") || t.starts_with("https://"))
                .cloned()
        })
        .ok_or_else(|| invalid("no URL found"))?;

    bodies.sort_by_key(|(rank, _)| *rank);
    let body = bodies.into_iter().next().map(|(_, body)| body);

    if json_body
        && !headers
            .keys()
            .any(|name: &String| name.eq_ignore_ascii_case("content-type"))
    {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let method = method.unwrap_or_else(|| {
        if body.is_some() { "POST" } else { "GET" }.to_string()
    });

    Ok(CurlRequest {
        url,
        method,
        headers,
        body,
    })
}

fn flag_value<'a>(
    args: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<&'a str, ConfigurationError> {
    args.next()
        .map(String::as_str)
        .ok_or_else(|| invalid(&format!("flag {flag} requires a value")))
}

fn invalid(reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidCurl {
        reason: reason.to_string(),
    }
}

/// Splits a command line into words using shell quoting rules.
fn tokenize(command: &str) -> Result<Vec<String>, ConfigurationError> {
    let joined = command.replace("\\\r\n", " ").replace("\\\n", " ");

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = joined.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => match chars.next() {
                Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_token = true;
                    }
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(invalid("unterminated quote"));
    }
    if in_token {
        tokens.push(current);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_get() {
        let req = parse_curl("curl https://example.com/api").unwrap();
        assert_eq!(req.url, "https://example.com/api");
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn multiline_post_with_headers_and_body() {
        let cmd = "curl -X post 'https://api.example.com/login' \\\n  -H 'Content-Type: application/json' \\\n  -H \"Authorization: Bearer abc\" \\\n  --data-raw '{\"user\": \"ops\"}'";
        let req = parse_curl(cmd).unwrap();
        assert_eq!(req.url, "https://api.example.com/login");
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["Content-Type"], "application/json");
        assert_eq!(req.headers["Authorization"], "Bearer abc");
        assert_eq!(req.body.as_deref(), Some("{\"user\": \"ops\"}"));
    }

    #[test]
    fn data_implies_post() {
        let req = parse_curl("curl -d 'a=1' http://localhost:8080/form").unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.url, "http://localhost:8080/form");
        assert_eq!(req.body.as_deref(), Some("a=1"));
    }

    #[test]
    fn data_raw_preferred_over_data() {
        let req = parse_curl("curl http://h/ -d first --data-raw second").unwrap();
        assert_eq!(req.body.as_deref(), Some("second"));
    }

    #[test]
    fn json_flag_sets_content_type() {
        let req = parse_curl("curl --json '{\"a\":1}' https://h/x").unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["Content-Type"], "application/json");
    }

    #[test]
    fn skips_flag_values_before_url() {
        let req = parse_curl("curl -u admin:secret -XPUT https://h/res/1").unwrap();
        assert_eq!(req.url, "https://h/res/1");
        assert_eq!(req.method, "PUT");
    }

    #[test]
    fn rejects_unterminated_quote() {
        let err = parse_curl("curl 'https://h/").unwrap_err();
        assert!(err.to_string().contains("unterminated quote"));
    }

    #[test]
    fn rejects_missing_url() {
        let err = parse_curl("curl -X GET").unwrap_err();
        assert!(err.to_string().contains("no URL"));
    }

    #[test]
    fn rejects_flag_without_value() {
        assert!(parse_curl("curl https://h/ -H").is_err());
    }
}
