use std::fs;

use hfxfer::hub::{RemoteError, RemoteErrorKind};
use hfxfer::transfer::{BatchOptions, DownloadOptions, MultiUploadOptions, UploadOptions};
use hfxfer::{HfxferError, RepoRef, RepoType};

mod common;
use common::{client, client_with_batches, Call, MockHub};

fn upload_options(file_path: &std::path::Path) -> UploadOptions {
    UploadOptions {
        repo_id: "org/model".to_string(),
        file_path: file_path.to_path_buf(),
        ..UploadOptions::default()
    }
}

// Single-file uploads

#[test]
fn upload_file_streams_content_and_reports_commit() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("model.bin");
    common::write_file(&path, b"weights");

    let client = client(MockHub::new());
    let receipt = client.upload_file(&upload_options(&path)).expect("upload");

    assert_eq!(receipt.commit_sha, "abc123");
    assert_eq!(receipt.path_in_repo, "model.bin");
    assert_eq!(receipt.size, 7);
    assert_eq!(
        receipt.file_url,
        "https://huggingface.co/org/model/blob/main/model.bin"
    );
    assert_eq!(
        client.hub().calls(),
        vec![Call::UploadOne {
            path_in_repo: "model.bin".to_string(),
            title: "Upload model.bin".to_string(),
            content: b"weights".to_vec(),
            token: Some("hf_default".to_string()),
        }]
    );
}

#[test]
fn upload_file_without_commit_id_reports_unknown() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");

    let client = client(MockHub::new().with_commit_oid(None));
    let receipt = client.upload_file(&upload_options(&path)).expect("upload");

    assert_eq!(receipt.commit_sha, hfxfer::transfer::UNKNOWN_COMMIT);
}

#[test]
fn upload_file_honours_overrides() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");

    let client = client(MockHub::new());
    let receipt = client
        .upload_file(&UploadOptions {
            repo_id: "https://huggingface.co/datasets/org/data".to_string(),
            repo_type: RepoType::Dataset,
            revision: Some("dev".to_string()),
            path_in_repo: Some("/raw/a.txt".to_string()),
            token: Some("hf_call".to_string()),
            message: Some("Add raw sample".to_string()),
            ..upload_options(&path)
        })
        .expect("upload");

    assert_eq!(
        receipt.file_url,
        "https://huggingface.co/datasets/org/data/blob/dev/raw/a.txt"
    );
    match &client.hub().calls()[0] {
        Call::UploadOne {
            path_in_repo,
            title,
            token,
            ..
        } => {
            assert_eq!(path_in_repo, "raw/a.txt");
            assert_eq!(title, "Add raw sample");
            assert_eq!(token.as_deref(), Some("hf_call"));
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[test]
fn upload_file_retries_transient_failures_from_byte_zero() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello world");

    let hub = MockHub::new().fail_next([
        RemoteError::status(503, "Service Unavailable"),
        RemoteError::new(RemoteErrorKind::Timeout, "timed out"),
    ]);
    let client = client(hub);
    client.upload_file(&upload_options(&path)).expect("upload");

    let calls = client.hub().calls();
    assert_eq!(calls.len(), 3);
    for call in calls {
        match call {
            Call::UploadOne { content, .. } => assert_eq!(content, b"hello world"),
            other => panic!("unexpected call {other:?}"),
        }
    }
}

#[test]
fn upload_file_does_not_retry_authentication_failures() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");

    let client = client(MockHub::new().fail_next([RemoteError::status(401, "Unauthorized")]));
    let err = client.upload_file(&upload_options(&path)).unwrap_err();

    assert!(matches!(err, HfxferError::Authentication { .. }), "{err:?}");
    assert_eq!(client.hub().calls().len(), 1);
}

#[test]
fn upload_file_gives_up_after_max_retries() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");

    let hub =
        MockHub::new().fail_titles_containing("Upload", RemoteError::status(502, "Bad Gateway"));
    let client = client(hub);
    let err = client.upload_file(&upload_options(&path)).unwrap_err();

    assert!(matches!(err, HfxferError::Network { .. }), "{err:?}");
    assert_eq!(client.hub().calls().len(), 4);
}

#[test]
fn upload_file_maps_rate_limits() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");

    let hub = MockHub::new()
        .fail_titles_containing("Upload", RemoteError::status(429, "Too Many Requests"));
    let err = client(hub).upload_file(&upload_options(&path)).unwrap_err();

    assert!(matches!(err, HfxferError::RateLimit { .. }), "{err:?}");
}

#[test]
fn upload_file_validates_before_any_remote_call() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let path = temp.path().join("a.txt");
    common::write_file(&path, b"hello");
    let client = client(MockHub::new());

    let err = client
        .upload_file(&UploadOptions {
            repo_id: "not-a-repo".to_string(),
            ..upload_options(&path)
        })
        .unwrap_err();
    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");

    let err = client
        .upload_file(&upload_options(&temp.path().join("missing.txt")))
        .unwrap_err();
    assert!(matches!(err, HfxferError::FileNotFound { .. }), "{err:?}");

    let err = client.upload_file(&upload_options(temp.path())).unwrap_err();
    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");

    assert!(client.hub().calls().is_empty());
}

// Multi-file uploads

#[test]
fn upload_files_reports_partial_success_when_second_batch_fails() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let files = common::real_files(temp.path(), 1500);

    let hub = MockHub::new().fail_titles_containing(
        "(batch 2/2)",
        RemoteError::status(500, "Internal Server Error"),
    );
    let client = client(hub);
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files: files.clone(),
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert_eq!(report.total_files, 1500);
    assert_eq!(report.files_uploaded, 1000);
    assert_eq!(report.failed_files, common::paths(&files[1000..]));
    assert_eq!(report.commit_sha.as_deref(), Some("abc123"));
    assert!(report.success());
    assert!(report.is_partial());
    assert!(matches!(
        report.last_error,
        Some(HfxferError::Network { .. })
    ));

    // One call for the first batch, four attempts for the second.
    let calls = client.hub().upload_many_calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0].0.len(), 1000);
    assert_eq!(calls[0].1, "Upload 1000 files (batch 1/2)");
    assert!(calls[1..].iter().all(|(paths, _)| paths.len() == 500));
}

#[test]
fn upload_files_uses_relative_paths_and_custom_message() {
    let temp = tempfile::tempdir().expect("create temp dir");
    common::write_file(&temp.path().join("data/a.txt"), b"a");
    common::write_file(&temp.path().join("data/nested/b.txt"), b"b");
    let resolution =
        hfxfer::pattern::resolve("data/**/*.txt", temp.path(), 100).expect("resolve");

    let client = client(MockHub::new());
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files: resolution.files,
            message: Some("Add data".to_string()),
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert_eq!(report.files_uploaded, 2);
    assert_eq!(
        client.hub().upload_many_calls(),
        vec![(
            vec!["data/a.txt".to_string(), "data/nested/b.txt".to_string()],
            "Add data".to_string()
        )]
    );
}

#[test]
fn upload_files_excludes_unreadable_files_from_batch() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut files = common::real_files(temp.path(), 3);
    let missing = common::phantom_files(&temp.path().join("gone"), 1);
    files.extend(missing.clone());

    let client = client(MockHub::new());
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files,
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert_eq!(report.files_uploaded, 3);
    assert_eq!(report.failed_files, common::paths(&missing));
    assert_eq!(client.hub().upload_many_calls()[0].0.len(), 3);
}

#[test]
fn upload_files_with_nothing_readable_makes_no_remote_call() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let files = common::phantom_files(temp.path(), 4);

    let client = client(MockHub::new());
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files,
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert!(!report.success());
    assert_eq!(report.failed_files.len(), 4);
    assert!(report.commit_sha.is_none());
    assert!(client.hub().calls().is_empty());
}

#[test]
fn upload_files_runs_concurrent_windows() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let files = common::real_files(temp.path(), 10);

    let client = client_with_batches(
        MockHub::new(),
        BatchOptions {
            batch_size: 2,
            concurrency: 3,
            ..BatchOptions::default()
        },
    );
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files,
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert_eq!(report.files_uploaded, 10);
    assert!(report.failed_files.is_empty());

    let mut titles: Vec<String> = client
        .hub()
        .upload_many_calls()
        .into_iter()
        .map(|(_, title)| title)
        .collect();
    titles.sort();
    let expected: Vec<String> = (1..=5)
        .map(|i| format!("Upload 2 files (batch {i}/5)"))
        .collect();
    assert_eq!(titles, expected);
}

#[test]
fn upload_files_holds_one_descriptor_per_batch_in_flight() {
    // Three concurrent batches of 1000 files each exceed the usual
    // 1024-descriptor soft limit if every file in a batch is held open.
    let temp = tempfile::tempdir().expect("create temp dir");
    let files = common::real_files(temp.path(), 3000);

    let client = client_with_batches(
        MockHub::new(),
        BatchOptions {
            batch_size: 1000,
            concurrency: 3,
            ..BatchOptions::default()
        },
    );
    let report = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files,
            ..MultiUploadOptions::default()
        })
        .expect("upload");

    assert_eq!(report.files_uploaded, 3000);
    assert!(report.failed_files.is_empty(), "{} files failed", report.failed_files.len());
    assert!(report.last_error.is_none());
    assert_eq!(client.hub().upload_many_calls().len(), 3);
}

#[test]
fn upload_files_rejects_bad_input() {
    let client = client(MockHub::new());

    let err = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            ..MultiUploadOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");

    let temp = tempfile::tempdir().expect("create temp dir");
    let mut files = common::real_files(temp.path(), 1);
    files[0].relative_path = "../escape.bin".to_string();
    let err = client
        .upload_files(&MultiUploadOptions {
            repo_id: "org/model".to_string(),
            files,
            ..MultiUploadOptions::default()
        })
        .unwrap_err();
    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");

    assert!(client.hub().calls().is_empty());
}

// Downloads

fn download_options(dir: &std::path::Path, path: &str) -> DownloadOptions {
    DownloadOptions {
        repo_id: "org/model".to_string(),
        file_path: path.to_string(),
        local_dir: Some(dir.to_path_buf()),
        ..DownloadOptions::default()
    }
}

#[test]
fn download_file_writes_basename_into_local_dir() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let dest = temp.path().join("out");
    let client = client(MockHub::new().with_file("sub/config.json", b"{\"a\":1}"));

    let receipt = client
        .download_file(&download_options(&dest, "sub/config.json"))
        .expect("download");

    assert_eq!(receipt.local_path, dest.join("config.json"));
    assert_eq!(receipt.file_size, 7);
    assert_eq!(fs::read(&receipt.local_path).unwrap(), b"{\"a\":1}");
}

#[test]
fn download_file_retries_then_succeeds() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let hub = MockHub::new()
        .with_file("a.bin", b"abc")
        .fail_next([RemoteError::transport("connection refused")]);
    let client = client(hub);

    let receipt = client
        .download_file(&download_options(temp.path(), "a.bin"))
        .expect("download");

    assert_eq!(receipt.file_size, 3);
    assert_eq!(client.hub().calls().len(), 2);
}

#[test]
fn interrupted_download_leaves_no_file_behind() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let hub = MockHub::new()
        .with_file("big.bin", &[7u8; 100_000])
        .break_downloads_after(40_000);
    let client = client(hub);

    let err = client
        .download_file(&download_options(temp.path(), "big.bin"))
        .unwrap_err();

    assert!(matches!(err, HfxferError::Network { .. }), "{err:?}");
    assert!(!temp.path().join("big.bin").exists());
    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn missing_remote_file_is_not_retried() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let client = client(MockHub::new());

    let err = client
        .download_file(&download_options(temp.path(), "nope.bin"))
        .unwrap_err();

    match err {
        HfxferError::FileNotFound { path, .. } => assert_eq!(path, "org/model:nope.bin"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(client.hub().calls().len(), 1);
}

#[test]
fn failed_download_does_not_create_local_dir() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let dest = temp.path().join("not-yet");
    let client = client(MockHub::new());

    let err = client
        .download_file(&download_options(&dest, "nope.bin"))
        .unwrap_err();

    assert!(matches!(err, HfxferError::FileNotFound { .. }), "{err:?}");
    assert!(!dest.exists());
}

#[test]
fn uncreatable_local_dir_is_a_permission_error() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let blocker = temp.path().join("plain-file");
    common::write_file(&blocker, b"not a directory");
    let client = client(MockHub::new().with_file("a.bin", b"abc"));

    let err = client
        .download_file(&download_options(&blocker.join("sub"), "a.bin"))
        .unwrap_err();

    match err {
        HfxferError::Permission { path, .. } => assert_eq!(path, blocker.join("sub")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(fs::read(&blocker).unwrap(), b"not a directory");
}

#[test]
fn download_rejects_traversal() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let client = client(MockHub::new());

    let err = client
        .download_file(&download_options(temp.path(), "../../etc/passwd"))
        .unwrap_err();

    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");
    assert!(client.hub().calls().is_empty());
}

// Repository and token checks

#[test]
fn validate_repository_collapses_failures_to_false() {
    let ok = client(MockHub::new());
    assert!(ok.validate_repository("org/model", RepoType::Model, None));

    let missing = client(
        MockHub::new().with_list_error(RemoteError::status(404, "Repository not found")),
    );
    assert!(!missing.validate_repository("org/model", RepoType::Model, None));
    assert_eq!(missing.hub().calls().len(), 1);

    let repo = RepoRef::new("org/model", RepoType::Model);
    let forbidden =
        client(MockHub::new().with_list_error(RemoteError::status(403, "Forbidden")));
    let err = forbidden.check_repository(&repo, Some("hf_x")).unwrap_err();
    assert!(matches!(err, HfxferError::Authentication { .. }), "{err:?}");
}

#[test]
fn validate_repository_rejects_malformed_ids_without_remote_call() {
    let client = client(MockHub::new());

    for bad in ["", "org", "org/name/extra", "org/na me"] {
        assert!(!client.validate_repository(bad, RepoType::Dataset, None), "{bad:?}");
    }
    assert!(!client.validate_repository("https://example.org/org/model", RepoType::Model, None));

    let err = client
        .check_repository(&RepoRef::new("not-a-repo", RepoType::Model), None)
        .unwrap_err();
    assert!(matches!(err, HfxferError::Validation { .. }), "{err:?}");
    assert!(client.hub().calls().is_empty());
}

#[test]
fn validate_token_checks_identity() {
    let client = client(MockHub::new());

    assert!(client.validate_token("hf_valid"));
    assert!(!client.validate_token("hf_bogus"));
    assert!(!client.validate_token("   "));
    assert_eq!(client.whoami("hf_valid").unwrap(), "tester");
    assert_eq!(
        client
            .hub()
            .calls()
            .iter()
            .filter(|c| **c == Call::Whoami)
            .count(),
        3
    );
}
