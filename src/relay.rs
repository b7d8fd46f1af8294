// src/relay.rs
//! Stream relay: provider SSE bytes -> `{content}` frames -> `[DONE]`.
//!
//! The relay is a single forward-only pass. Each decoded event is turned into
//! at most one frame and handed on before the next chunk is read.

use std::collections::VecDeque;

use futures_util::{stream, Stream, StreamExt};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::ByteStream;

/// Terminal marker used by both the provider and the relay.
pub const DONE: &str = "[DONE]";

// ------------------------------------------------------------
// SSE decoding
// ------------------------------------------------------------

/// Incremental `text/event-stream` decoder. Yields the joined `data:` field of
/// every complete event; chunk boundaries may fall anywhere, including inside
/// a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.on_line(line, &mut out);
        }
        out
    }

    /// Flush an event left open by a stream that ended without a blank line.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.on_line(line.trim_end_matches('\r'), &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn on_line(&mut self, line: &str, out: &mut Vec<String>) {
        if line.is_empty() {
            self.dispatch(out);
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // comments (":"), event:, id:, retry: are not used
    }

    fn dispatch(&mut self, out: &mut Vec<String>) {
        if !self.data.is_empty() {
            out.push(self.data.join("\n"));
            self.data.clear();
        }
    }
}

// ------------------------------------------------------------
// Token extraction
// ------------------------------------------------------------

/// What one provider event contributes to the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// Decoded text fragment.
    Text(String),
    /// Not JSON; forwarded verbatim so no model output is lost.
    Raw(String),
    /// JSON without text (usage, role-only delta, empty fragment).
    Empty,
}

/// Pull the text fragment out of a Workers AI (`response`) or OpenAI
/// (`choices[0].delta.content`) event payload.
pub fn extract_token(data: &str) -> TokenEvent {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return TokenEvent::Raw(data.to_string()),
    };
    let text = v
        .get("response")
        .and_then(Value::as_str)
        .or_else(|| v.pointer("/choices/0/delta/content").and_then(Value::as_str));
    match text {
        Some(t) if !t.is_empty() => TokenEvent::Text(t.to_string()),
        _ => TokenEvent::Empty,
    }
}

// ------------------------------------------------------------
// Frames
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Content(String),
    Done,
}

#[derive(Debug, Serialize)]
struct ContentFrame {
    content: String,
}

impl RelayFrame {
    /// The SSE `data:` payload for this frame.
    pub fn data(&self) -> String {
        match self {
            RelayFrame::Content(content) => serde_json::to_string(&ContentFrame {
                content: content.clone(),
            })
            .unwrap_or_else(|_| content.clone()),
            RelayFrame::Done => DONE.to_string(),
        }
    }

    /// Full wire encoding: `data: <payload>\n\n`.
    pub fn encode(&self) -> String {
        format!("data: {}\n\n", self.data())
    }
}

struct RelayState {
    upstream: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<RelayFrame>,
    finished: bool,
}

impl RelayState {
    fn push_data(&mut self, data: String) {
        if self.finished {
            return;
        }
        if data.trim() == DONE {
            self.close();
            return;
        }
        match extract_token(&data) {
            TokenEvent::Text(t) => {
                counter!("relay_frames_total").increment(1);
                self.pending.push_back(RelayFrame::Content(t));
            }
            TokenEvent::Raw(raw) => {
                debug!(len = raw.len(), "forwarding undecodable provider event as raw text");
                counter!("relay_raw_fragments_total").increment(1);
                self.pending.push_back(RelayFrame::Content(raw));
            }
            TokenEvent::Empty => {}
        }
    }

    fn close(&mut self) {
        if !self.finished {
            self.finished = true;
            self.pending.push_back(RelayFrame::Done);
        }
    }
}

/// Re-frame a provider stream. Always ends with exactly one [`RelayFrame::Done`],
/// including when the upstream breaks or ends without its own marker.
pub fn relay(upstream: ByteStream) -> impl Stream<Item = RelayFrame> + Send {
    let state = RelayState {
        upstream,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((frame, st));
            }
            if st.finished {
                return None;
            }
            match st.upstream.next().await {
                Some(Ok(chunk)) => {
                    for data in st.decoder.feed(&chunk) {
                        st.push_data(data);
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "provider stream broke; closing relay");
                    st.close();
                }
                None => {
                    for data in st.decoder.finish() {
                        st.push_data(data);
                    }
                    st.close();
                }
            }
        }
    })
}

// ------------------------------------------------------------
// Client-side accumulation
// ------------------------------------------------------------

/// Concatenates relay frames back into the full reply.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    text: String,
    done: bool,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one `data:` payload. Returns `true` once `[DONE]` has been seen.
    pub fn push_data(&mut self, data: &str) -> bool {
        if self.done {
            return true;
        }
        if data == DONE {
            self.done = true;
            return true;
        }
        // JSON without a string `content` (usage, keep-alive objects) adds nothing;
        // only undecodable payloads are taken as raw text.
        match serde_json::from_str::<Value>(data) {
            Ok(frame) => {
                if let Some(content) = frame.get("content").and_then(|c| c.as_str()) {
                    self.text.push_str(content);
                }
            }
            Err(_) => self.text.push_str(data),
        }
        false
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use bytes::Bytes;

    fn upstream(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, ProviderError>(Bytes::from_static(c.as_bytes()))),
        ))
    }

    async fn collect(chunks: Vec<&'static str>) -> Vec<RelayFrame> {
        relay(upstream(chunks)).collect().await
    }

    #[tokio::test]
    async fn n_events_yield_n_frames_then_done() {
        let frames = collect(vec![
            "data: {\"response\":\"a\"}\n\n",
            "data: {\"response\":\"b\"}\n\n",
            "data: {\"response\":\"c\"}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                RelayFrame::Content("a".into()),
                RelayFrame::Content("b".into()),
                RelayFrame::Content("c".into()),
                RelayFrame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let frames = collect(vec![
            "data: {\"resp",
            "onse\":\"hé\"}\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n",
            "\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                RelayFrame::Content("hé".into()),
                RelayFrame::Content("llo".into()),
                RelayFrame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_event_is_forwarded_raw() {
        let frames = collect(vec!["data: not json\n\n", "data: [DONE]\n\n"]).await;
        assert_eq!(
            frames,
            vec![RelayFrame::Content("not json".into()), RelayFrame::Done]
        );
    }

    #[tokio::test]
    async fn textless_events_are_skipped_and_missing_done_is_added() {
        let frames = collect(vec![
            ": keep-alive\n\n",
            "data: {\"response\":\"\"}\n\n",
            "data: {\"usage\":{\"prompt_tokens\":3}}\n\n",
            "data: {\"response\":\"x\"}",
        ])
        .await;
        assert_eq!(frames, vec![RelayFrame::Content("x".into()), RelayFrame::Done]);
    }

    #[tokio::test]
    async fn upstream_error_still_terminates_with_done() {
        let s: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"response\":\"a\"}\n\n")),
            Err(ProviderError::Stream("reset".into())),
            Ok(Bytes::from_static(b"data: {\"response\":\"never\"}\n\n")),
        ]));
        let frames: Vec<RelayFrame> = relay(s).collect().await;
        assert_eq!(frames, vec![RelayFrame::Content("a".into()), RelayFrame::Done]);
    }

    #[test]
    fn frames_encode_as_sse() {
        assert_eq!(
            RelayFrame::Content("say \"hi\"".into()).encode(),
            "data: {\"content\":\"say \\\"hi\\\"\"}\n\n"
        );
        assert_eq!(RelayFrame::Done.encode(), "data: [DONE]\n\n");
    }

    #[test]
    fn accumulator_concatenates_and_tolerates_raw_frames() {
        let mut acc = FrameAccumulator::new();
        assert!(!acc.push_data(r#"{"content":"- [x] **LLM"}"#));
        assert!(!acc.push_data("/AI Engine**"));
        assert!(acc.push_data(DONE));
        assert!(acc.push_data(r#"{"content":"ignored"}"#));
        assert_eq!(acc.text(), "- [x] **LLM/AI Engine**");
    }

    #[test]
    fn accumulator_skips_json_without_content() {
        let mut acc = FrameAccumulator::new();
        acc.push_data(r#"{"content":"a"}"#);
        acc.push_data(r#"{"usage":{"prompt_tokens":3}}"#);
        acc.push_data("42");
        acc.push_data(r#"{"content":"b"}"#);
        assert_eq!(acc.text(), "ab");
    }

    #[tokio::test]
    async fn frames_go_out_before_upstream_finishes() {
        use std::time::Duration;
        use tokio::sync::mpsc;
        use tokio::time::timeout;

        let (tx, rx) = mpsc::channel::<&'static str>(4);
        let upstream: ByteStream = Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|c| (Ok(Bytes::from_static(c.as_bytes())), rx))
        }));
        let mut frames = Box::pin(relay(upstream));

        tx.send("data: {\"response\":\"first\"}\n\n").await.unwrap();
        let first = timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("frame emitted while upstream is still open");
        assert_eq!(first, Some(RelayFrame::Content("first".into())));

        tx.send("data: [DONE]\n\n").await.unwrap();
        let done = timeout(Duration::from_secs(1), frames.next()).await.unwrap();
        assert_eq!(done, Some(RelayFrame::Done));

        drop(tx);
        assert_eq!(frames.next().await, None);
    }
}
