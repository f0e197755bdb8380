use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use base64::{prelude::BASE64_STANDARD, Engine};
use hikari_classbox::{
    scramble::{self, POLICY_IV, POLICY_KEY},
    Api, ClassboxError, ClassboxResult, Decrypter, Muxer, Pipeline, PipelineConfig,
    PipelineError, PipelineEvent, PipelinePhase, Session,
};
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const TOKEN: &str = "session-token";
const DEVICE: &str = "device-7";
const ASSET: &str = "lesson-42";
const KID_DASHED: &str = "2bd1bea3-1039-4e5e-b32d-fba4db3d8bd1";
const KEY: &str = "9f86d081884c7d659a2feaa0c55ad015";
const COOKIES: &str =
    "CloudFront-Policy=b64policy; CloudFront-Signature=b64sig; CloudFront-Key-Pair-Id=APKATESTKEY";

/// Copies the input, standing in for mp4decrypt.
struct CopyDecrypter;

impl Decrypter for CopyDecrypter {
    async fn decrypt(
        &self,
        _kid: &str,
        _key: &str,
        input: &Path,
        output: &Path,
    ) -> ClassboxResult<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Concatenates video then audio, standing in for ffmpeg.
struct ConcatMuxer;

impl Muxer for ConcatMuxer {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> ClassboxResult<()> {
        let mut data = tokio::fs::read(video).await?;
        data.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, data).await?;
        Ok(())
    }
}

struct FailingDecrypter;

impl Decrypter for FailingDecrypter {
    async fn decrypt(&self, _: &str, _: &str, _: &Path, _: &Path) -> ClassboxResult<()> {
        Err(ClassboxError::IOError(std::io::Error::other(
            "decrypt stand-in failure",
        )))
    }
}

struct PanicMuxer;

impl Muxer for PanicMuxer {
    async fn mux(&self, _: &Path, _: &Path, _: &Path) -> ClassboxResult<()> {
        panic!("mux must not run after a failed decrypt");
    }
}

fn encrypted(plain: &str) -> String {
    let encryptor = cbc::Encryptor::<aes::Aes128>::new(POLICY_KEY.into(), POLICY_IV.into());
    BASE64_STANDARD.encode(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes()))
}

fn session() -> Session {
    Session::new(TOKEN, DEVICE, ASSET)
}

fn config_for(server: &MockServer, work_root: &Path) -> PipelineConfig {
    let base = Url::parse(&server.uri()).unwrap();
    PipelineConfig {
        api: Api::new(base.clone(), base),
        target_height: 720,
        concurrency: 4,
        retries: 1,
        request_timeout: Duration::from_secs(5),
        work_root: work_root.to_path_buf(),
        keep_temp_files: false,
        fail_on_missing_segments: false,
    }
}

fn collector() -> (
    Arc<Mutex<Vec<PipelineEvent>>>,
    Arc<dyn hikari_classbox::PipelineObserver>,
) {
    let events: Arc<Mutex<Vec<PipelineEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let observer: Arc<dyn hikari_classbox::PipelineObserver> =
        Arc::new(move |event: &PipelineEvent| {
            sink.lock().unwrap().push(event.clone());
        });
    (events, observer)
}

async fn mount_exchange(server: &MockServer, manifest: String) {
    let policy = format!(
        "Policy={}&Signature={}&Key-Pair-Id={}",
        encrypted("b64policy"),
        encrypted("b64sig"),
        encrypted("APKATESTKEY"),
    );
    Mock::given(method("POST"))
        .and(path("/v2/analytics/watch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "policy": policy }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/{ASSET}/master.mpd")))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest))
        .mount(server)
        .await;

    let kid = KID_DASHED.replace('-', "");
    let encoded = scramble::encode_otp_key(&kid, TOKEN);
    let otp = BASE64_STANDARD.encode(scramble::xor_cycle(KEY.as_bytes(), TOKEN.as_bytes()));
    Mock::given(method("GET"))
        .and(path("/v2/drm/otp"))
        .and(query_param("key", encoded.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": { "otp": otp }
        })))
        .mount(server)
        .await;
}

/// Serves every init and media segment. Paths listed in `broken` answer 500
/// instead. Each mock also proves that the signed query and the cookie grant
/// made it onto the request.
async fn mount_media(server: &MockServer, broken: &[&str]) {
    let files: [(&str, &[u8]); 6] = [
        ("audio/init.mp4", b"AINIT"),
        ("audio/seg-1.m4s", b"A1"),
        ("audio/seg-2.m4s", b"A2"),
        ("video/init.mp4", b"VINIT"),
        ("video/seg-1.m4s", b"V1"),
        ("video/seg-2.m4s", b"V2"),
    ];
    for (name, body) in files {
        let template = if broken.contains(&name) {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(body.to_vec())
        };
        Mock::given(method("GET"))
            .and(path(format!("/{ASSET}/{name}")))
            .and(query_param("Policy", "b64policy"))
            .and(header("cookie", COOKIES))
            .respond_with(template)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_pipeline_runs_every_phase() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_exchange(&server, include_str!("../fixtures/pipeline.mpd").to_string()).await;
    mount_media(&server, &[]).await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("out/lesson.mp4");
    let pipeline = Pipeline::with_tools(config_for(&server, root.path()), CopyDecrypter, ConcatMuxer);
    let (events, observer) = collector();

    let outcome = pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await?;

    assert!(outcome.report.is_complete());
    assert_eq!(outcome.output, output);
    let merged = tokio::fs::read(&output).await?;
    assert_eq!(merged, b"VINITV1V2AINITA1A2");

    let events = events.lock().unwrap();
    assert!(events.windows(2).all(|pair| pair[0].percent <= pair[1].percent));
    let last = events.last().unwrap();
    assert_eq!(last.phase, PipelinePhase::Cleanup);
    assert_eq!(last.percent, 100.0);
    assert!(events
        .iter()
        .any(|event| event.phase == PipelinePhase::Download && event.snapshot.is_some()));

    let mut phases: Vec<_> = events.iter().map(|event| event.phase).collect();
    phases.dedup();
    assert_eq!(
        phases,
        vec![
            PipelinePhase::License,
            PipelinePhase::Manifest,
            PipelinePhase::Download,
            PipelinePhase::Decrypt,
            PipelinePhase::Mux,
            PipelinePhase::Cleanup,
        ]
    );

    // workspace is gone, only the output directory remains
    let leftovers: Vec<PathBuf> = std::fs::read_dir(root.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    assert_eq!(leftovers, vec![root.path().join("out")]);
    Ok(())
}

#[tokio::test]
async fn test_pipeline_keeps_workspace_on_request() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_exchange(&server, include_str!("../fixtures/pipeline.mpd").to_string()).await;
    mount_media(&server, &[]).await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("lesson.mp4");
    let mut config = config_for(&server, root.path());
    config.keep_temp_files = true;
    let pipeline = Pipeline::with_tools(config, CopyDecrypter, ConcatMuxer);
    let (_, observer) = collector();

    pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await?;

    let work_dir = std::fs::read_dir(root.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with("classbox_lesson-42_"))
        })
        .expect("workspace directory should remain");
    assert!(work_dir.join("video.mp4").exists());
    assert!(work_dir.join("audio_clear.mp4").exists());
    Ok(())
}

#[tokio::test]
async fn test_pipeline_tolerates_missing_segments_by_default() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_exchange(&server, include_str!("../fixtures/pipeline.mpd").to_string()).await;
    mount_media(&server, &["audio/seg-1.m4s"]).await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("lesson.mp4");
    let pipeline = Pipeline::with_tools(config_for(&server, root.path()), CopyDecrypter, ConcatMuxer);
    let (_, observer) = collector();

    let outcome = pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await?;

    assert_eq!(outcome.report.failed_count(), 1);
    assert!(!outcome.report.is_complete());
    // the gap is simply absent from the merged file
    let merged = tokio::fs::read(&output).await?;
    assert_eq!(merged, b"VINITV1V2AINITA2");
    Ok(())
}

#[tokio::test]
async fn test_pipeline_fails_on_missing_segments_when_configured() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_exchange(&server, include_str!("../fixtures/pipeline.mpd").to_string()).await;
    mount_media(&server, &["video/seg-2.m4s"]).await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("lesson.mp4");
    let mut config = config_for(&server, root.path());
    config.fail_on_missing_segments = true;
    let pipeline = Pipeline::with_tools(config, CopyDecrypter, ConcatMuxer);
    let (_, observer) = collector();

    let error = pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::MissingSegments(1)));
    assert_eq!(error.phase(), PipelinePhase::Download);
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_pipeline_reports_manifest_phase_for_unparseable_body() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // the kid is present so the license phase succeeds, but the body is not
    // a manifest
    mount_exchange(
        &server,
        format!(r#"not-a-manifest default_KID="{KID_DASHED}" tail"#),
    )
    .await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("lesson.mp4");
    let pipeline = Pipeline::with_tools(config_for(&server, root.path()), CopyDecrypter, ConcatMuxer);
    let (_, observer) = collector();

    let error = pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error.phase(), PipelinePhase::Manifest);
    Ok(())
}

#[tokio::test]
async fn test_pipeline_stops_before_mux_when_decrypt_fails() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_exchange(&server, include_str!("../fixtures/pipeline.mpd").to_string()).await;
    mount_media(&server, &[]).await;

    let root = tempfile::tempdir()?;
    let output = root.path().join("lesson.mp4");
    let pipeline = Pipeline::with_tools(config_for(&server, root.path()), FailingDecrypter, PanicMuxer);
    let (_, observer) = collector();

    let error = pipeline
        .run(&session(), &output, observer, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error.phase(), PipelinePhase::Decrypt);
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_pipeline_honors_cancellation_before_start() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let config = PipelineConfig {
        work_root: root.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::with_tools(config, CopyDecrypter, ConcatMuxer);
    let (events, observer) = collector();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = pipeline
        .run(&session(), &root.path().join("lesson.mp4"), observer, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        PipelineError::Cancelled(PipelinePhase::License)
    ));
    assert!(events.lock().unwrap().is_empty());
    Ok(())
}
