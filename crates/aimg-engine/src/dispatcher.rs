use std::fs;
use std::path::{Path, PathBuf};

use aimg_contracts::audit::{new_request_id, AuditLog, AuditRecord};
use aimg_contracts::models::{ModelSelector, ModelSpec};
use aimg_contracts::request::{
    GeneratedImageRef, RequestDescriptor, RequestMode, MAX_IMAGE_COUNT, MIN_PROMPT_CHARS,
};

use crate::api::{GenerateCall, ImageApi, VariationCall};
use crate::credentials::{ApiKey, CredentialSource};
use crate::error::{chain_text, DispatchError};
use crate::output::output_path;
use crate::sinks::{BrowserOpener, ImageFetcher};
use crate::validator;

/// Model ids requested for each mode, usually from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChoice {
    pub create: String,
    pub variation: String,
}

impl Default for ModelChoice {
    fn default() -> Self {
        Self {
            create: aimg_contracts::settings::DEFAULT_CREATE_MODEL.to_string(),
            variation: aimg_contracts::settings::DEFAULT_VARIATION_MODEL.to_string(),
        }
    }
}

/// Outcome of a dispatch whose remote call succeeded.
#[derive(Debug)]
pub struct DispatchReport {
    pub request_id: String,
    pub model: String,
    pub images: Vec<GeneratedImageRef>,
    /// Indices of images handed to the browser without error.
    pub opened: Vec<usize>,
    pub written: Vec<PathBuf>,
    /// Per-item `DownloadFailed` / `WriteFailed` errors. Nothing is rolled back.
    pub failures: Vec<DispatchError>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs one request descriptor against the remote API and fans the result
/// out to the selected sinks.
///
/// `dispatch` takes `&mut self`, so a dispatcher never has two requests in
/// flight. Output files from an earlier dispatch with the same template are
/// overwritten.
pub struct Dispatcher {
    api: Box<dyn ImageApi>,
    credentials: Box<dyn CredentialSource>,
    browser: Box<dyn BrowserOpener>,
    fetcher: Box<dyn ImageFetcher>,
    audit: Option<AuditLog>,
    selector: ModelSelector,
    models: ModelChoice,
}

impl Dispatcher {
    pub fn new(
        api: Box<dyn ImageApi>,
        credentials: Box<dyn CredentialSource>,
        browser: Box<dyn BrowserOpener>,
        fetcher: Box<dyn ImageFetcher>,
    ) -> Self {
        Self {
            api,
            credentials,
            browser,
            fetcher,
            audit: None,
            selector: ModelSelector::default(),
            models: ModelChoice::default(),
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_models(mut self, models: ModelChoice) -> Self {
        self.models = models;
        self
    }

    pub fn dispatch(
        &mut self,
        descriptor: &RequestDescriptor,
    ) -> Result<DispatchReport, DispatchError> {
        check_preconditions(descriptor)?;
        let key = self.credentials.api_key()?;
        let model = self.resolve_model(descriptor)?;
        let request_id = new_request_id();

        tracing::info!(
            request_id = %request_id,
            mode = descriptor.mode.audit_label(),
            model = %model.name,
            n = descriptor.count,
            size = %descriptor.size,
            "dispatching image request"
        );
        let mut images = self.call_remote(descriptor, &key, &model.name)?;
        if images.is_empty() {
            return Err(DispatchError::RemoteCallFailed(
                "response contained no images".to_string(),
            ));
        }
        let requested = usize::from(descriptor.count);
        if images.len() < requested {
            tracing::warn!(
                requested,
                returned = images.len(),
                "remote returned fewer images than requested"
            );
        }
        images.truncate(requested);

        self.append_audit(&request_id, descriptor, &model.name);

        let mut report = DispatchReport {
            request_id,
            model: model.name,
            images,
            opened: Vec::new(),
            written: Vec::new(),
            failures: Vec::new(),
        };
        if descriptor.sinks.browser {
            self.open_in_browser(&mut report);
        }
        if descriptor.sinks.file {
            self.write_files(&descriptor.output_template, &mut report);
        }

        tracing::info!(
            request_id = %report.request_id,
            images = report.images.len(),
            opened = report.opened.len(),
            written = report.written.len(),
            failures = report.failures.len(),
            "image request finished"
        );
        Ok(report)
    }

    fn resolve_model(&self, descriptor: &RequestDescriptor) -> Result<ModelSpec, DispatchError> {
        let requested = match descriptor.mode {
            RequestMode::PromptCreate => &self.models.create,
            RequestMode::Variation => &self.models.variation,
        };
        let selection = self.selector.select(requested, descriptor.mode.into())?;
        if let Some(fallback) = &selection.fallback {
            tracing::warn!(model = %selection.model.name, "{fallback}");
        }
        let model = selection.model;
        if !model.supports_size(descriptor.size) {
            tracing::warn!(model = %model.name, size = %descriptor.size, "model may reject this size");
        }
        if descriptor.count > model.max_images {
            tracing::warn!(
                model = %model.name,
                n = descriptor.count,
                max = model.max_images,
                "model may reject this image count"
            );
        }
        Ok(model)
    }

    fn call_remote(
        &self,
        descriptor: &RequestDescriptor,
        key: &ApiKey,
        model: &str,
    ) -> Result<Vec<GeneratedImageRef>, DispatchError> {
        let result = match descriptor.mode {
            RequestMode::PromptCreate => self.api.generate(
                key,
                &GenerateCall {
                    model: model.to_string(),
                    prompt: descriptor.trimmed_prompt().to_string(),
                    n: descriptor.count,
                    size: descriptor.size,
                },
            ),
            RequestMode::Variation => {
                let path = input_image(descriptor)?;
                let image = fs::read(path).map_err(|err| DispatchError::FileUnreadable {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })?;
                let file_name = path
                    .file_name()
                    .and_then(|value| value.to_str())
                    .unwrap_or("image.png")
                    .to_string();
                self.api.create_variation(
                    key,
                    &VariationCall {
                        model: model.to_string(),
                        image,
                        file_name,
                        n: descriptor.count,
                        size: descriptor.size,
                    },
                )
            }
        };
        result.map_err(|err| DispatchError::remote(&err))
    }

    fn append_audit(&self, request_id: &str, descriptor: &RequestDescriptor, model: &str) {
        let Some(audit) = self.audit.as_ref() else {
            return;
        };
        let record = AuditRecord::for_request(request_id, descriptor, model);
        if let Err(err) = audit.append(&record) {
            tracing::warn!(
                path = %audit.path().display(),
                error = %chain_text(&err),
                "audit log append failed"
            );
        }
    }

    fn open_in_browser(&self, report: &mut DispatchReport) {
        for (index, image) in report.images.iter().enumerate() {
            match self.browser.open(&image.url) {
                Ok(()) => report.opened.push(index),
                Err(err) => {
                    tracing::warn!(index, url = %image.url, error = %err, "browser open failed");
                }
            }
        }
    }

    fn write_files(&self, template: &Path, report: &mut DispatchReport) {
        for (index, image) in report.images.iter().enumerate() {
            let path = output_path(template, index);
            let bytes = match self.fetcher.fetch(&image.url) {
                Ok(bytes) => bytes,
                Err(err) => {
                    report.failures.push(DispatchError::DownloadFailed {
                        index,
                        url: image.url.clone(),
                        reason: chain_text(&err),
                    });
                    continue;
                }
            };
            match write_image(&path, &bytes) {
                Ok(()) => {
                    tracing::debug!(index, path = %path.display(), bytes = bytes.len(), "wrote image");
                    report.written.push(path);
                }
                Err(err) => report.failures.push(DispatchError::WriteFailed {
                    index,
                    path,
                    reason: err.to_string(),
                }),
            }
        }
    }
}

/// Checks that need no I/O beyond reading the input image.
fn check_preconditions(descriptor: &RequestDescriptor) -> Result<(), DispatchError> {
    if descriptor.sinks.is_empty() {
        return Err(DispatchError::NoSinkSelected);
    }
    if descriptor.count == 0 || descriptor.count > MAX_IMAGE_COUNT {
        return Err(DispatchError::InvalidImageCount(descriptor.count));
    }
    match descriptor.mode {
        RequestMode::PromptCreate => {
            let chars = descriptor.prompt_chars();
            if chars < MIN_PROMPT_CHARS {
                return Err(DispatchError::InvalidPrompt { chars });
            }
        }
        RequestMode::Variation => {
            validator::validate(input_image(descriptor)?)?;
        }
    }
    Ok(())
}

fn input_image(descriptor: &RequestDescriptor) -> Result<&Path, DispatchError> {
    match descriptor.input_image.as_deref() {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(DispatchError::FileUnreadable {
            path: PathBuf::new(),
            reason: "no input image selected".to_string(),
        }),
    }
}

fn write_image(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    use aimg_contracts::models::{Capability, ModelRegistry, SelectionError};
    use aimg_contracts::request::{ImageSize, Sinks};
    use anyhow::{anyhow, bail};
    use indexmap::IndexMap;

    use super::*;
    use crate::validator::tests::write_png;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Generate(GenerateCall),
        Variation {
            model: String,
            bytes: usize,
            n: u8,
            size: ImageSize,
        },
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<Call>>>,
        opened: Arc<Mutex<Vec<String>>>,
        fetched: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }

        fn opened(&self) -> Vec<String> {
            self.opened.lock().map(|urls| urls.clone()).unwrap_or_default()
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().map(|urls| urls.clone()).unwrap_or_default()
        }
    }

    struct FakeApi {
        recorder: Recorder,
        urls: Vec<String>,
        fail: bool,
    }

    impl FakeApi {
        fn respond(&self, call: Call) -> anyhow::Result<Vec<GeneratedImageRef>> {
            if let Ok(mut calls) = self.recorder.calls.lock() {
                calls.push(call);
            }
            if self.fail {
                return Err(anyhow!("connection refused").context("OpenAI request failed"));
            }
            Ok(self.urls.iter().map(GeneratedImageRef::new).collect())
        }
    }

    impl ImageApi for FakeApi {
        fn generate(
            &self,
            _key: &ApiKey,
            call: &GenerateCall,
        ) -> anyhow::Result<Vec<GeneratedImageRef>> {
            self.respond(Call::Generate(call.clone()))
        }

        fn create_variation(
            &self,
            _key: &ApiKey,
            call: &VariationCall,
        ) -> anyhow::Result<Vec<GeneratedImageRef>> {
            self.respond(Call::Variation {
                model: call.model.clone(),
                bytes: call.image.len(),
                n: call.n,
                size: call.size,
            })
        }
    }

    struct FakeCredentials(Option<&'static str>);

    impl CredentialSource for FakeCredentials {
        fn api_key(&self) -> Result<ApiKey, DispatchError> {
            match self.0 {
                Some(raw) => ApiKey::new(raw),
                None => Err(DispatchError::AuthenticationUnavailable(
                    "set GPTKEY".to_string(),
                )),
            }
        }
    }

    struct FakeBrowser {
        recorder: Recorder,
        fail: bool,
    }

    impl BrowserOpener for FakeBrowser {
        fn open(&self, url: &str) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no browser"));
            }
            if let Ok(mut opened) = self.recorder.opened.lock() {
                opened.push(url.to_string());
            }
            Ok(())
        }
    }

    struct FakeFetcher {
        recorder: Recorder,
        bodies: HashMap<String, Vec<u8>>,
    }

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if let Ok(mut fetched) = self.recorder.fetched.lock() {
                fetched.push(url.to_string());
            }
            match self.bodies.get(url) {
                Some(body) => Ok(body.clone()),
                None => bail!("image download failed (404): not found"),
            }
        }
    }

    struct Harness {
        recorder: Recorder,
        urls: Vec<String>,
        api_fails: bool,
        browser_fails: bool,
        key: Option<&'static str>,
        missing_bodies: Vec<String>,
    }

    impl Harness {
        fn returning(count: usize) -> Self {
            Self {
                recorder: Recorder::default(),
                urls: (0..count)
                    .map(|idx| format!("https://images.example/{idx}.png"))
                    .collect(),
                api_fails: false,
                browser_fails: false,
                key: Some("sk-test"),
                missing_bodies: Vec::new(),
            }
        }

        fn dispatcher(&self) -> Dispatcher {
            let bodies = self
                .urls
                .iter()
                .filter(|url| !self.missing_bodies.contains(url))
                .map(|url| (url.clone(), format!("png:{url}").into_bytes()))
                .collect::<HashMap<String, Vec<u8>>>();
            Dispatcher::new(
                Box::new(FakeApi {
                    recorder: self.recorder.clone(),
                    urls: self.urls.clone(),
                    fail: self.api_fails,
                }),
                Box::new(FakeCredentials(self.key)),
                Box::new(FakeBrowser {
                    recorder: self.recorder.clone(),
                    fail: self.browser_fails,
                }),
                Box::new(FakeFetcher {
                    recorder: self.recorder.clone(),
                    bodies,
                }),
            )
        }
    }

    fn read_audit(path: &Path) -> anyhow::Result<Vec<AuditRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        let records = content
            .lines()
            .map(serde_json::from_str::<AuditRecord>)
            .collect::<Result<Vec<AuditRecord>, _>>()?;
        Ok(records)
    }

    #[test]
    fn prompt_request_writes_indexed_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let harness = Harness::returning(2);
        let audit_path = temp.path().join("aimg.log");
        let mut dispatcher = harness
            .dispatcher()
            .with_audit_log(AuditLog::new(&audit_path));
        let template = temp.path().join("out").join("img.png");
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(2)
            .with_size(ImageSize::S512)
            .with_sinks(Sinks::FILE)
            .with_output_template(&template);

        let report = dispatcher.dispatch(&descriptor)?;

        assert!(report.is_complete());
        assert_eq!(report.images.len(), 2);
        let first = temp.path().join("out").join("img0.png");
        let second = temp.path().join("out").join("img1.png");
        assert_eq!(report.written, vec![first.clone(), second.clone()]);
        assert_eq!(fs::read(&first)?, b"png:https://images.example/0.png".to_vec());
        assert_eq!(fs::read(&second)?, b"png:https://images.example/1.png".to_vec());
        assert!(harness.recorder.opened().is_empty());
        assert_eq!(
            harness.recorder.calls(),
            vec![Call::Generate(GenerateCall {
                model: "dall-e-2".to_string(),
                prompt: "a red fox in snow".to_string(),
                n: 2,
                size: ImageSize::S512,
            })]
        );

        let records = read_audit(&audit_path)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "prompt");
        assert_eq!(records[0].input, "a red fox in snow");
        assert_eq!(records[0].request_id, report.request_id);
        Ok(())
    }

    #[test]
    fn variation_request_opens_browser_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("in.png");
        write_png(&input, 300, 300)?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        let template = temp.path().join("out").join("img.png");
        let descriptor = RequestDescriptor::variation(&input)
            .with_count(1)
            .with_size(ImageSize::S256)
            .with_sinks(Sinks::BROWSER)
            .with_output_template(&template);

        let report = dispatcher.dispatch(&descriptor)?;

        let calls = harness.recorder.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            Call::Variation { model, bytes, n: 1, size: ImageSize::S256 }
                if model == "dall-e-2" && *bytes as u64 == fs::metadata(&input)?.len()
        ));
        assert_eq!(harness.recorder.opened(), vec!["https://images.example/0.png"]);
        assert_eq!(report.opened, vec![0]);
        assert!(report.written.is_empty());
        assert!(harness.recorder.fetched().is_empty());
        assert!(!temp.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn non_square_input_stops_before_remote_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("bad.png");
        write_png(&input, 300, 400)?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::variation(&input).with_sinks(Sinks::BOTH);

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(err, Some(DispatchError::ConstraintViolation { .. })));
        assert!(harness.recorder.calls().is_empty());
        Ok(())
    }

    #[test]
    fn missing_input_image_stops_before_remote_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::variation(temp.path().join("absent.png"))
            .with_sinks(Sinks::BOTH)
            .with_output_template(temp.path().join("img.png"));

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(err, Some(DispatchError::FileUnreadable { .. })));
        assert!(harness.recorder.calls().is_empty());
        assert!(harness.recorder.fetched().is_empty());
        Ok(())
    }

    #[test]
    fn registry_without_variation_model_stops_before_remote_call() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("in.png");
        write_png(&input, 64, 64)?;
        let mut models = IndexMap::new();
        models.insert(
            "dall-e-3".to_string(),
            ModelSpec {
                name: "dall-e-3".to_string(),
                capabilities: vec![Capability::Create],
                sizes: vec![ImageSize::S1024],
                max_images: 1,
            },
        );
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        dispatcher.selector = ModelSelector::new(ModelRegistry::new(Some(models)));
        let descriptor = RequestDescriptor::variation(&input).with_sinks(Sinks::BROWSER);

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(
            err,
            Some(DispatchError::ModelUnavailable(SelectionError::NoCapableModel(
                Capability::Variation
            )))
        ));
        assert!(harness.recorder.calls().is_empty());
        Ok(())
    }

    #[test]
    fn empty_sinks_fail_before_validation_or_network() -> anyhow::Result<()> {
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        // The input does not exist; validating it would fail differently.
        let descriptor = RequestDescriptor::variation("does/not/exist.png").with_sinks(Sinks::NONE);

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(err, Some(DispatchError::NoSinkSelected)));
        assert!(harness.recorder.calls().is_empty());
        Ok(())
    }

    #[test]
    fn short_prompts_are_rejected_without_network() -> anyhow::Result<()> {
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        for prompt in ["", "a", "fox", "  ab \n", "狐狸猫"] {
            let descriptor = RequestDescriptor::prompt_create(prompt).with_sinks(Sinks::BROWSER);
            let err = dispatcher.dispatch(&descriptor).err();
            assert!(
                matches!(err, Some(DispatchError::InvalidPrompt { .. })),
                "prompt {prompt:?} gave {err:?}"
            );
        }
        assert!(harness.recorder.calls().is_empty());
        Ok(())
    }

    #[test]
    fn image_count_outside_range_is_rejected() {
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        for count in [0, 11] {
            let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
                .with_count(count)
                .with_sinks(Sinks::BROWSER);
            let err = dispatcher.dispatch(&descriptor).err();
            assert!(matches!(err, Some(DispatchError::InvalidImageCount(c)) if c == count));
        }
        assert!(harness.recorder.calls().is_empty());
    }

    #[test]
    fn missing_credentials_stop_before_remote_call() {
        let mut harness = Harness::returning(1);
        harness.key = None;
        let mut dispatcher = harness.dispatcher();
        let descriptor =
            RequestDescriptor::prompt_create("a red fox in snow").with_sinks(Sinks::BROWSER);

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(err, Some(DispatchError::AuthenticationUnavailable(_))));
        assert!(harness.recorder.calls().is_empty());
    }

    #[test]
    fn remote_failure_leaves_no_output_and_no_audit_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut harness = Harness::returning(2);
        harness.api_fails = true;
        let audit_path = temp.path().join("aimg.log");
        let mut dispatcher = harness
            .dispatcher()
            .with_audit_log(AuditLog::new(&audit_path));
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(2)
            .with_sinks(Sinks::BOTH)
            .with_output_template(temp.path().join("out").join("img.png"));

        let err = dispatcher.dispatch(&descriptor).err();

        match err {
            Some(DispatchError::RemoteCallFailed(details)) => {
                assert_eq!(
                    details,
                    "OpenAI request failed | caused by: connection refused"
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(harness.recorder.opened().is_empty());
        assert!(harness.recorder.fetched().is_empty());
        assert!(!temp.path().join("out").exists());
        assert!(read_audit(&audit_path)?.is_empty());
        Ok(())
    }

    #[test]
    fn download_failure_is_reported_without_rollback() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut harness = Harness::returning(3);
        harness.missing_bodies = vec!["https://images.example/1.png".to_string()];
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(3)
            .with_sinks(Sinks::FILE)
            .with_output_template(temp.path().join("img.png"));

        let report = dispatcher.dispatch(&descriptor)?;

        assert!(!report.is_complete());
        assert_eq!(
            report.written,
            vec![temp.path().join("img0.png"), temp.path().join("img2.png")]
        );
        assert!(temp.path().join("img0.png").exists());
        assert!(!temp.path().join("img1.png").exists());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            DispatchError::DownloadFailed { index: 1, .. }
        ));
        Ok(())
    }

    #[test]
    fn write_failure_is_reported_per_item() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // A regular file where the output directory should be.
        let blocker = temp.path().join("out");
        fs::write(&blocker, b"not a directory")?;
        let harness = Harness::returning(2);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(2)
            .with_sinks(Sinks::FILE)
            .with_output_template(blocker.join("img.png"));

        let report = dispatcher.dispatch(&descriptor)?;

        assert!(report.written.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|err| matches!(err, DispatchError::WriteFailed { .. })));
        Ok(())
    }

    #[test]
    fn browser_failures_are_not_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut harness = Harness::returning(2);
        harness.browser_fails = true;
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(2)
            .with_sinks(Sinks::BOTH)
            .with_output_template(temp.path().join("img.png"));

        let report = dispatcher.dispatch(&descriptor)?;

        assert!(report.is_complete());
        assert!(report.opened.is_empty());
        assert_eq!(report.written.len(), 2);
        Ok(())
    }

    #[test]
    fn short_response_is_clamped_to_returned_count() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(3)
            .with_sinks(Sinks::BOTH)
            .with_output_template(temp.path().join("img.png"));

        let report = dispatcher.dispatch(&descriptor)?;

        assert_eq!(report.images.len(), 1);
        assert_eq!(report.written, vec![temp.path().join("img0.png")]);
        assert_eq!(harness.recorder.opened().len(), 1);
        Ok(())
    }

    #[test]
    fn long_response_is_cut_to_requested_count() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let harness = Harness::returning(4);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_count(2)
            .with_sinks(Sinks::BROWSER)
            .with_output_template(temp.path().join("img.png"));

        let report = dispatcher.dispatch(&descriptor)?;

        assert_eq!(report.images.len(), 2);
        assert_eq!(harness.recorder.opened().len(), 2);
        Ok(())
    }

    #[test]
    fn empty_response_is_a_remote_failure() {
        let harness = Harness::returning(0);
        let mut dispatcher = harness.dispatcher();
        let descriptor =
            RequestDescriptor::prompt_create("a red fox in snow").with_sinks(Sinks::BROWSER);

        let err = dispatcher.dispatch(&descriptor).err();

        assert!(matches!(err, Some(DispatchError::RemoteCallFailed(_))));
    }

    #[test]
    fn variation_model_falls_back_when_unsupported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("in.png");
        write_png(&input, 64, 64)?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher().with_models(ModelChoice {
            create: "dall-e-3".to_string(),
            variation: "dall-e-3".to_string(),
        });
        let descriptor = RequestDescriptor::variation(&input).with_sinks(Sinks::BROWSER);

        let report = dispatcher.dispatch(&descriptor)?;

        assert_eq!(report.model, "dall-e-2");
        Ok(())
    }

    #[test]
    fn same_template_overwrites_previous_outputs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness.dispatcher();
        let descriptor = RequestDescriptor::prompt_create("a red fox in snow")
            .with_sinks(Sinks::FILE)
            .with_output_template(temp.path().join("img.png"));

        let first = dispatcher.dispatch(&descriptor)?;
        let second = dispatcher.dispatch(&descriptor)?;

        assert_eq!(first.written, second.written);
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(harness.recorder.calls().len(), 2);
        assert_eq!(fs::read_dir(temp.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn audit_failure_does_not_change_outcome() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // The audit log path is a directory, so appending fails.
        let audit_dir = temp.path().join("aimg.log");
        fs::create_dir_all(&audit_dir)?;
        let harness = Harness::returning(1);
        let mut dispatcher = harness
            .dispatcher()
            .with_audit_log(AuditLog::new(&audit_dir));
        let descriptor =
            RequestDescriptor::prompt_create("a red fox in snow").with_sinks(Sinks::BROWSER);

        let report = dispatcher.dispatch(&descriptor)?;

        assert!(report.is_complete());
        assert_eq!(report.opened, vec![0]);
        Ok(())
    }
}
