//! Live-reload broadcasting over WebSocket.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Path of the WebSocket endpoint.
pub const RELOAD_PATH: &str = "/__reload";

/// Path of the client script.
pub const SCRIPT_PATH: &str = "/__reload.js";

/// Messages sent to connected pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Full page reload
    Reload,

    /// Connection established
    Connected,
}

/// Signals connected clients that the site changed.
pub trait ReloadNotifier: Send + Sync {
    /// Fire-and-forget; never waits for clients.
    fn notify(&self);
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl ReloadHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers is not an error
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadNotifier for ReloadHub {
    fn notify(&self) {
        tracing::debug!("Reloading {} client(s)", self.subscriber_count());
        self.send(ReloadMessage::Reload);
    }
}

/// Client-side script that reloads the page on a `reload` message.
///
/// The socket URL is derived from the page's own host, so the script works
/// on whatever address the server is bound to.
pub fn reload_client_script() -> String {
    format!(
        r#"(function() {{
  'use strict';

  var attempts = 0;
  var maxAttempts = 10;

  function connect() {{
    var scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
    var ws = new WebSocket(scheme + location.host + '{}');

    ws.onopen = function() {{
      if (attempts > 0) {{
        location.reload();
      }}
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);
      if (msg.type === 'reload') {{
        location.reload();
      }} else if (msg.type === 'connected') {{
        console.log('[burnish] live reload connected');
      }}
    }};

    ws.onclose = function() {{
      if (attempts < maxAttempts) {{
        attempts++;
        setTimeout(connect, 1000 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        RELOAD_PATH
    )
}

/// The tag injected into served HTML.
pub fn script_tag() -> String {
    format!("<script src=\"{}\"></script>", SCRIPT_PATH)
}

/// Insert the client script tag before the last `</body>`, or append it.
pub fn inject_script(html: &str) -> String {
    let tag = script_tag();
    if html.contains(&tag) {
        return html.to_string();
    }
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}\n{}", &html[..at], tag, &html[at..]),
        None => format!("{}{}\n", html, tag),
    }
}
