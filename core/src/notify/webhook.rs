//! JSON webhook notifier for chat robots
//!
//! Posts `text` or `markdown` messages and treats a non-zero `errcode` in the
//! reply as a delivery failure.

use super::{Notifier, NotifyError};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_CHARSET, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MARKDOWN_TITLE: &str = "Circuit breaker notice";

#[derive(Serialize)]
struct TextMessage<'a> {
    at: Mentions<'a>,
    text: TextContent<'a>,
    msgtype: &'static str,
}

#[derive(Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct MarkdownMessage<'a> {
    at: Mentions<'a>,
    markdown: MarkdownContent<'a>,
    msgtype: &'static str,
}

#[derive(Serialize)]
struct MarkdownContent<'a> {
    title: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Mentions<'a> {
    at_mobiles: Vec<String>,
    at_user_ids: &'a [String],
    is_at_all: bool,
}

impl<'a> Mentions<'a> {
    fn users(at_user_ids: &'a [String]) -> Self {
        Self {
            at_mobiles: Vec::new(),
            at_user_ids,
            is_at_all: false,
        }
    }
}

#[derive(Deserialize)]
struct WebhookReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Notifier posting to a robot webhook
///
/// An empty webhook turns every call into a successful no-op.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    webhook: String,
    /// Built on first delivery unless injected, then reused
    client: OnceLock<Client>,
}

impl WebhookNotifier {
    pub fn new(webhook: impl Into<String>) -> Self {
        Self {
            webhook: webhook.into(),
            client: OnceLock::new(),
        }
    }

    /// Use a preconfigured HTTP client (proxies, TLS roots, timeouts)
    pub fn with_client(webhook: impl Into<String>, client: Client) -> Self {
        Self {
            webhook: webhook.into(),
            client: OnceLock::from(client),
        }
    }

    pub fn set_webhook(&mut self, webhook: impl Into<String>) {
        self.webhook = webhook.into();
    }

    fn post<T: Serialize>(&self, payload: &T) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(payload)?;

        let client = match self.client.get() {
            Some(client) => client,
            None => {
                let built = Client::builder().timeout(HTTP_TIMEOUT).build()?;
                self.client.get_or_init(|| built)
            }
        };

        let response = client
            .post(&self.webhook)
            .header(ACCEPT_CHARSET, "utf8")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;
        let bytes = response.bytes()?;

        let reply: WebhookReply = serde_json::from_slice(&bytes)?;
        if reply.errcode != 0 {
            return Err(NotifyError::Remote {
                code: reply.errcode,
                message: reply.errmsg,
            });
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn webhook(&self) -> &str {
        &self.webhook
    }

    fn notify_text(&self, content: &str, at_user_ids: &[String]) -> Result<(), NotifyError> {
        if self.webhook.is_empty() {
            return Ok(());
        }
        self.post(&TextMessage {
            at: Mentions::users(at_user_ids),
            text: TextContent { content },
            msgtype: "text",
        })
    }

    fn notify_markdown(&self, content: &str, at_user_ids: &[String]) -> Result<(), NotifyError> {
        if self.webhook.is_empty() {
            return Ok(());
        }
        self.post(&MarkdownMessage {
            at: Mentions::users(at_user_ids),
            markdown: MarkdownContent {
                title: MARKDOWN_TITLE,
                text: content,
            },
            msgtype: "markdown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn client() -> Client {
        Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn read_body(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .map(|value| value.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                let start = pos + 4;
                if buf.len() >= start + length {
                    return String::from_utf8_lossy(&buf[start..start + length]).into_owned();
                }
            }
        }
        String::new()
    }

    /// Accept one request, answer with `reply`, hand back the request body
    fn serve_once(reply: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let body = read_body(&mut stream);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            stream.write_all(response.as_bytes()).unwrap();
            body
        });

        (format!("http://{addr}/robot/send"), handle)
    }

    #[test]
    fn test_text_message_payload() {
        let (url, server) = serve_once(r#"{"errcode":0,"errmsg":"ok"}"#);
        let notifier = WebhookNotifier::with_client(url, client());

        notifier
            .notify_text("breaker opened", &["u1".to_string()])
            .unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["msgtype"], "text");
        assert_eq!(body["text"]["content"], "breaker opened");
        assert_eq!(body["at"]["atUserIds"][0], "u1");
        assert_eq!(body["at"]["isAtAll"], false);
    }

    #[test]
    fn test_markdown_message_payload() {
        let (url, server) = serve_once(r#"{"errcode":0}"#);
        let notifier = WebhookNotifier::with_client(url, client());

        notifier.notify_markdown("### open", &[]).unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["msgtype"], "markdown");
        assert_eq!(body["markdown"]["title"], MARKDOWN_TITLE);
        assert_eq!(body["markdown"]["text"], "### open");
    }

    #[test]
    fn test_remote_error_code() {
        let (url, server) = serve_once(r#"{"errcode":310000,"errmsg":"keywords not in content"}"#);
        let notifier = WebhookNotifier::with_client(url, client());

        let result = notifier.notify_text("breaker opened", &[]);
        server.join().unwrap();

        match result {
            Err(NotifyError::Remote { code, message }) => {
                assert_eq!(code, 310000);
                assert_eq!(message, "keywords not in content");
            }
            other => panic!("Expected remote error, got: {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_reply() {
        let (url, server) = serve_once("not json");
        let notifier = WebhookNotifier::with_client(url, client());

        let result = notifier.notify_text("breaker opened", &[]);
        server.join().unwrap();

        assert!(matches!(result, Err(NotifyError::Decode(_))));
    }

    #[test]
    fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::with_client(format!("http://{addr}/"), client());
        let result = notifier.notify_text("breaker opened", &[]);

        assert!(matches!(result, Err(NotifyError::Http(_))));
    }

    #[test]
    fn test_default_client_is_built_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = WebhookNotifier::new(format!("http://{addr}/"));
        assert!(notifier.client.get().is_none());

        let _ = notifier.notify_text("breaker opened", &[]);
        let first = notifier.client.get().expect("client cached") as *const Client;

        let _ = notifier.notify_markdown("breaker closed", &[]);
        let second = notifier.client.get().expect("client cached") as *const Client;
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_webhook_is_noop() {
        let mut notifier = WebhookNotifier::new("");
        assert!(notifier.notify_text("ignored", &[]).is_ok());
        assert!(notifier.notify_markdown("ignored", &[]).is_ok());

        notifier.set_webhook("http://example.invalid/hook");
        assert_eq!(notifier.webhook(), "http://example.invalid/hook");
        assert_eq!(notifier.name(), "webhook");
    }
}
