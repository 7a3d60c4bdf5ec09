//! Asynchronous clip loading.
//!
//! [`SoundLoader::load`] hands back a [`DeferredSound`] right away together
//! with a [`PendingLoad`] ticket. The clip is fetched and turned into a
//! backend handle on a tokio task; the owner polls the ticket on its own tick
//! and the ticket resolves the sound exactly once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::timeout;
use url::Url;

use crate::config::SoundConfig;
use crate::sound::{DeferredSound, Sound, SoundBackend};

/// Where a clip's bytes come from.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClipSource {
    /// Local file; relative paths resolve against the asset root.
    File { path: PathBuf },
    Http { url: Url },
}

impl ClipSource {
    /// `http://` and `https://` strings become URLs, anything else a path.
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s).with_context(|| format!("Invalid clip URL '{}'", s))?;
            Ok(Self::Http { url })
        } else {
            Ok(Self::File {
                path: PathBuf::from(s),
            })
        }
    }
}

impl fmt::Display for ClipSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipSource::File { path } => write!(f, "{}", path.display()),
            ClipSource::Http { url } => write!(f, "{}", url),
        }
    }
}

#[async_trait]
pub trait ClipFetcher: Send + Sync {
    async fn fetch(&self, source: &ClipSource) -> Result<Bytes>;
}

/// Reads files with `tokio::fs` and URLs with `reqwest`.
pub struct DefaultFetcher {
    asset_root: PathBuf,
    max_clip_bytes: usize,
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new(config: &SoundConfig) -> Self {
        Self {
            asset_root: config.asset_root.clone(),
            max_clip_bytes: config.max_clip_bytes,
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client (proxy, TLS, headers).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn fetch_file(&self, path: &Path) -> Result<Bytes> {
        let path = if path.is_relative() {
            self.asset_root.join(path)
        } else {
            path.to_path_buf()
        };
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat '{}'", path.display()))?;
        if meta.len() > self.max_clip_bytes as u64 {
            bail!(
                "Clip '{}' is {} bytes, limit is {}",
                path.display(),
                meta.len(),
                self.max_clip_bytes
            );
        }
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        Ok(Bytes::from(data))
    }

    async fn fetch_http(&self, url: &Url) -> Result<Bytes> {
        let mut resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        if !resp.status().is_success() {
            bail!("HTTP Error: {} for {}", resp.status(), url);
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_clip_bytes as u64 {
                bail!("Clip {} is {} bytes, limit is {}", url, len, self.max_clip_bytes);
            }
        }

        // Content-Length may be absent (chunked), so count while streaming
        let mut body = BytesMut::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
        {
            if body.len() + chunk.len() > self.max_clip_bytes {
                bail!(
                    "Clip {} exceeds {} bytes, limit is {}",
                    url,
                    body.len() + chunk.len(),
                    self.max_clip_bytes
                );
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl ClipFetcher for DefaultFetcher {
    async fn fetch(&self, source: &ClipSource) -> Result<Bytes> {
        match source {
            ClipSource::File { path } => self.fetch_file(path).await,
            ClipSource::Http { url } => self.fetch_http(url).await,
        }
    }
}

/// Turns fetched clip bytes into a platform handle.
pub trait BackendFactory<B>: Send + Sync {
    fn create(&self, clip: Bytes) -> Result<B>;
}

impl<B, F> BackendFactory<B> for F
where
    F: Fn(Bytes) -> Result<B> + Send + Sync,
{
    fn create(&self, clip: Bytes) -> Result<B> {
        self(clip)
    }
}

pub struct SoundLoader<B> {
    config: SoundConfig,
    fetcher: Arc<dyn ClipFetcher>,
    factory: Arc<dyn BackendFactory<B>>,
}

impl<B: SoundBackend + Send + 'static> SoundLoader<B> {
    pub fn new(config: SoundConfig, factory: impl BackendFactory<B> + 'static) -> Self {
        let fetcher = Arc::new(DefaultFetcher::new(&config));
        Self {
            config,
            fetcher,
            factory: Arc::new(factory),
        }
    }

    /// Replace the default file/HTTP fetcher.
    pub fn with_fetcher(mut self, fetcher: impl ClipFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn config(&self) -> &SoundConfig {
        &self.config
    }

    /// Start loading `source`. Must be called inside a tokio runtime.
    ///
    /// The returned ticket belongs to the returned sound; polling it against
    /// any other sound resolves the wrong one.
    pub fn load(&self, source: ClipSource) -> (DeferredSound<B>, PendingLoad<B>) {
        let mut sound = DeferredSound::new(source.to_string());
        sound.set_volume(self.config.initial_volume);

        let (tx, rx) = oneshot::channel();
        let fetcher = self.fetcher.clone();
        let factory = self.factory.clone();
        let limit = self.config.load_timeout();
        let max_clip_bytes = self.config.max_clip_bytes;

        tokio::spawn(async move {
            let outcome = load_clip(fetcher.as_ref(), factory, &source, limit, max_clip_bytes).await;
            // 接收端已丢弃，释放无人认领的句柄
            if let Err(Ok(mut handle)) = tx.send(outcome) {
                log::debug!("Load ticket for '{}' dropped, releasing handle", source);
                handle.release();
            }
        });

        (sound, PendingLoad { rx: Some(rx) })
    }
}

async fn load_clip<B: Send + 'static>(
    fetcher: &dyn ClipFetcher,
    factory: Arc<dyn BackendFactory<B>>,
    source: &ClipSource,
    limit: Duration,
    max_clip_bytes: usize,
) -> Result<B> {
    let clip = timeout(limit, fetcher.fetch(source))
        .await
        .map_err(|_| anyhow!("Timed out after {}ms loading '{}'", limit.as_millis(), source))?
        .with_context(|| format!("Failed to fetch clip '{}'", source))?;

    if clip.is_empty() {
        bail!("Clip '{}' is empty", source);
    }
    if clip.len() > max_clip_bytes {
        bail!("Clip '{}' is {} bytes, limit is {}", source, clip.len(), max_clip_bytes);
    }
    log::info!("Fetched clip '{}': {} bytes", source, clip.len());

    // opening a device may block
    tokio::task::spawn_blocking(move || factory.create(clip))
        .await
        .map_err(|e| anyhow!("Backend factory for '{}' panicked: {}", source, e))?
        .with_context(|| format!("Failed to create playback handle for '{}'", source))
}

/// Ticket for an in-flight load.
pub struct PendingLoad<B> {
    rx: Option<oneshot::Receiver<Result<B>>>,
}

impl<B: SoundBackend> PendingLoad<B> {
    pub fn is_resolved(&self) -> bool {
        self.rx.is_none()
    }

    /// Resolve `sound` if the load has finished. Returns true once resolved;
    /// the sound is notified only on the first such call.
    pub fn poll(&mut self, sound: &mut DeferredSound<B>) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Closed) => Err(loader_gone(sound)),
        };
        self.rx = None;
        resolve(sound, outcome);
        true
    }

    /// Wait for the load to finish and resolve `sound`.
    pub async fn wait(mut self, sound: &mut DeferredSound<B>) {
        let Some(rx) = self.rx.take() else {
            return;
        };
        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(loader_gone(sound)),
        };
        resolve(sound, outcome);
    }
}

fn loader_gone<B: SoundBackend>(sound: &DeferredSound<B>) -> anyhow::Error {
    anyhow!("Loader for '{}' stopped before finishing", sound.label())
}

fn resolve<B: SoundBackend>(sound: &mut DeferredSound<B>, outcome: Result<B>) {
    match outcome {
        Ok(handle) => sound.notify_loaded(handle),
        Err(e) => sound.notify_load_failed(e),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::*;
    use crate::sound::mock::{Call, CallLog, MockBackend};
    use crate::sound::{SoundState, from_fn};
    use crate::error::LoadError;

    #[derive(Default)]
    struct MemoryFetcher {
        clips: HashMap<String, Bytes>,
        delay: Option<Duration>,
    }

    impl MemoryFetcher {
        fn with_clip(mut self, name: &str, data: &'static [u8]) -> Self {
            self.clips.insert(name.to_string(), Bytes::from_static(data));
            self
        }
    }

    #[async_trait]
    impl ClipFetcher for MemoryFetcher {
        async fn fetch(&self, source: &ClipSource) -> Result<Bytes> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.clips
                .get(&source.to_string())
                .cloned()
                .ok_or_else(|| anyhow!("no such clip"))
        }
    }

    fn test_config() -> SoundConfig {
        let mut config = SoundConfig::default();
        config.initial_volume = 0.8;
        config.load_timeout_ms = 1000;
        config.max_clip_bytes = 64;
        config
    }

    fn mock_loader(log: &CallLog, fetcher: MemoryFetcher) -> SoundLoader<MockBackend> {
        let log = log.clone();
        SoundLoader::new(test_config(), move |_clip: Bytes| -> Result<MockBackend> {
            Ok(MockBackend::new(&log))
        })
        .with_fetcher(fetcher)
    }

    fn file(name: &str) -> ClipSource {
        ClipSource::File {
            path: PathBuf::from(name),
        }
    }

    #[tokio::test]
    async fn test_load_replays_buffered_state() {
        let log = CallLog::default();
        let loader = mock_loader(&log, MemoryFetcher::default().with_clip("boom.pcm", b"\x01\x02"));

        let (mut sound, pending) = loader.load(file("boom.pcm"));
        assert_eq!(sound.state(), SoundState::Loading);
        assert_eq!(sound.label(), "boom.pcm");
        assert!((sound.volume() - 0.8).abs() < f32::EPSILON);
        assert!(!sound.play());

        pending.wait(&mut sound).await;
        assert_eq!(sound.state(), SoundState::Ready);
        assert_eq!(
            log.calls(),
            vec![Call::SetVolume(0.8), Call::SetLooping(false), Call::Play]
        );
    }

    #[tokio::test]
    async fn test_poll_resolves_exactly_once() {
        let log = CallLog::default();
        let loader = mock_loader(&log, MemoryFetcher::default().with_clip("a.pcm", b"\x00\x00"));
        let (mut sound, mut pending) = loader.load(file("a.pcm"));

        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        sound.add_callback(from_fn(
            move |res: Result<&DeferredSound<MockBackend>, &LoadError>| {
                assert!(res.is_ok());
                *counter.borrow_mut() += 1;
            },
        ));

        // nothing has run yet on the current-thread runtime
        assert!(!pending.poll(&mut sound));
        while !pending.poll(&mut sound) {
            tokio::task::yield_now().await;
        }
        assert!(pending.is_resolved());
        assert!(pending.poll(&mut sound));
        assert!(pending.poll(&mut sound));
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(sound.state(), SoundState::Ready);
    }

    #[tokio::test]
    async fn test_fetch_failure_reaches_observers() {
        let log = CallLog::default();
        let loader = mock_loader(&log, MemoryFetcher::default());
        let (mut sound, pending) = loader.load(file("missing.pcm"));

        let seen = Rc::new(RefCell::new(String::new()));
        let sink = seen.clone();
        sound.add_callback(from_fn(
            move |res: Result<&DeferredSound<MockBackend>, &LoadError>| {
                if let Err(e) = res {
                    *sink.borrow_mut() = e.to_string();
                }
            },
        ));
        sound.play();
        pending.wait(&mut sound).await;

        assert_eq!(sound.state(), SoundState::Failed);
        assert!(sound.is_playing());
        assert!(seen.borrow().contains("missing.pcm"));
        assert!(seen.borrow().contains("no such clip"));
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_factory_error_is_load_failure() {
        let loader: SoundLoader<MockBackend> =
            SoundLoader::new(test_config(), |_clip: Bytes| -> Result<MockBackend> {
                bail!("unsupported sample format")
            })
            .with_fetcher(MemoryFetcher::default().with_clip("x.pcm", b"\x01"));
        let (mut sound, pending) = loader.load(file("x.pcm"));
        pending.wait(&mut sound).await;

        let err = sound.error().expect("load should fail").to_string();
        assert!(err.contains("Failed to create playback handle"));
        assert!(err.contains("unsupported sample format"));
    }

    #[tokio::test]
    async fn test_empty_and_oversized_clips_fail() {
        let log = CallLog::default();
        let fetcher = MemoryFetcher::default()
            .with_clip("empty.pcm", b"")
            .with_clip("big.pcm", &[0u8; 128]);
        let loader = mock_loader(&log, fetcher);

        let (mut empty, pending) = loader.load(file("empty.pcm"));
        pending.wait(&mut empty).await;
        assert!(empty.error().unwrap().to_string().contains("is empty"));

        let (mut big, pending) = loader.load(file("big.pcm"));
        pending.wait(&mut big).await;
        assert!(big.error().unwrap().to_string().contains("limit is 64"));
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let log = CallLog::default();
        let mut fetcher = MemoryFetcher::default().with_clip("slow.pcm", b"\x01");
        fetcher.delay = Some(Duration::from_millis(200));
        let mut config = test_config();
        config.load_timeout_ms = 20;
        let factory_log = log.clone();
        let loader: SoundLoader<MockBackend> = SoundLoader::new(config, move |_clip: Bytes| -> Result<MockBackend> {
            Ok(MockBackend::new(&factory_log))
        })
        .with_fetcher(fetcher);

        let (mut sound, pending) = loader.load(file("slow.pcm"));
        pending.wait(&mut sound).await;
        assert!(sound.error().unwrap().to_string().contains("Timed out after 20ms"));
    }

    #[tokio::test]
    async fn test_dropped_ticket_releases_handle() {
        let log = CallLog::default();
        let loader = mock_loader(&log, MemoryFetcher::default().with_clip("a.pcm", b"\x01"));
        let (sound, pending) = loader.load(file("a.pcm"));
        drop(pending);
        for _ in 0..200 {
            if !log.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(log.calls(), vec![Call::Release]);
        assert_eq!(sound.state(), SoundState::Loading);
    }

    #[tokio::test]
    async fn test_panicking_factory_fails_the_load() {
        let loader: SoundLoader<MockBackend> =
            SoundLoader::new(test_config(), |_clip: Bytes| -> Result<MockBackend> {
                panic!("backend exploded")
            })
            .with_fetcher(MemoryFetcher::default().with_clip("a.pcm", b"\x01"));
        let (mut sound, mut pending) = loader.load(file("a.pcm"));

        for _ in 0..200 {
            if pending.poll(&mut sound) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sound.state(), SoundState::Failed);
        assert!(sound.error().unwrap().to_string().contains("panicked"));
    }

    /// Serve `response` verbatim to the first connection after its request
    /// headers arrive.
    async fn serve_once(response: Vec<u8>) -> ClipSource {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let _ = stream.write_all(&response).await;
            let _ = stream.shutdown().await;
        });
        ClipSource::Http {
            url: Url::parse(&format!("http://{}/clip.pcm", addr)).unwrap(),
        }
    }

    fn http_fetcher() -> DefaultFetcher {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        DefaultFetcher::new(&test_config()).with_client(client)
    }

    fn chunked_response(chunks: usize, chunk_len: usize) -> Vec<u8> {
        let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
            .to_vec();
        for _ in 0..chunks {
            out.extend_from_slice(format!("{:x}\r\n", chunk_len).as_bytes());
            out.extend(std::iter::repeat_n(7u8, chunk_len));
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
        out
    }

    #[tokio::test]
    async fn test_http_fetch_reassembles_chunked_body() {
        let source = serve_once(chunked_response(2, 4)).await;
        let clip = http_fetcher().fetch(&source).await.unwrap();
        assert_eq!(&clip[..], &[7u8; 8]);
    }

    #[tokio::test]
    async fn test_http_error_status_fails() {
        let source = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await;
        let err = http_fetcher().fetch(&source).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_http_declared_length_over_limit_fails() {
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n".to_vec();
        response.extend(std::iter::repeat_n(0u8, 1000));
        let source = serve_once(response).await;

        let err = http_fetcher().fetch(&source).await.unwrap_err();
        assert!(err.to_string().contains("limit is 64"));
    }

    #[tokio::test]
    async fn test_http_chunked_body_over_limit_fails() {
        let source = serve_once(chunked_response(10, 100)).await;
        let err = http_fetcher().fetch(&source).await.unwrap_err();
        assert!(err.to_string().contains("limit is 64"));
    }

    #[tokio::test]
    async fn test_default_fetcher_reads_relative_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("beep.pcm"), [1u8, 0, 2, 0]).unwrap();
        std::fs::write(dir.path().join("huge.pcm"), [0u8; 100]).unwrap();

        let mut config = test_config();
        config.asset_root = dir.path().to_path_buf();
        let fetcher = DefaultFetcher::new(&config);

        let clip = fetcher.fetch(&file("beep.pcm")).await.unwrap();
        assert_eq!(&clip[..], &[1, 0, 2, 0]);

        let absolute = ClipSource::File {
            path: dir.path().join("beep.pcm"),
        };
        assert_eq!(fetcher.fetch(&absolute).await.unwrap().len(), 4);

        let err = fetcher.fetch(&file("nope.pcm")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to stat"));

        let err = fetcher.fetch(&file("huge.pcm")).await.unwrap_err();
        assert!(err.to_string().contains("limit is 64"));
    }

    #[test]
    fn test_clip_source_parse() {
        assert_eq!(
            ClipSource::parse("sfx/jump.pcm").unwrap(),
            ClipSource::File {
                path: PathBuf::from("sfx/jump.pcm")
            }
        );
        let remote = ClipSource::parse("https://cdn.example.com/a.pcm").unwrap();
        assert!(matches!(remote, ClipSource::Http { .. }));
        assert_eq!(remote.to_string(), "https://cdn.example.com/a.pcm");
        assert!(ClipSource::parse("http://").is_err());
    }

    #[test]
    fn test_clip_source_from_json() {
        let file: ClipSource =
            serde_json::from_str(r#"{"type":"file","path":"music/theme.pcm"}"#).unwrap();
        assert_eq!(file.to_string(), "music/theme.pcm");

        let http: ClipSource =
            serde_json::from_str(r#"{"type":"http","url":"http://localhost:8080/a.pcm"}"#)
                .unwrap();
        assert_eq!(http.to_string(), "http://localhost:8080/a.pcm");

        assert!(serde_json::from_str::<ClipSource>(r#"{"type":"ftp"}"#).is_err());
    }
}
