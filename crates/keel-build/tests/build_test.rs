use std::path::{Path, PathBuf};
use std::process::Command;

use keel_build::context::{CONTEXT_DIR, application_files, create_context, remove_context};
use keel_build::eject::{EjectError, eject, is_ejected, load_ejected_dockerfile};
use keel_build::layer::ContentDigest;
use keel_build::{
    BuildError, BuildPlan, BuildStep, DockerfileGenerator, LayerInputs, Phase, PlanError,
    StepKind,
};
use keel_core::{BuildConfig, KeelConfig};
use proptest::prelude::*;
use tempfile::TempDir;

fn default_plan() -> BuildPlan {
    BuildPlan::from_config(&BuildConfig::default()).unwrap()
}

fn inputs(manifest: &[u8], files: &[(&str, &[u8])]) -> LayerInputs {
    LayerInputs {
        manifest: ContentDigest::of(manifest),
        application: ContentDigest::of_file_set(
            files.iter().map(|(p, c)| (Path::new(*p), *c)),
        ),
    }
}

fn write_python_project(dir: &Path) {
    std::fs::write(dir.join("requirements.txt"), "foo==1.0\n").unwrap();
    std::fs::write(dir.join("main.py"), "print('hello')\n").unwrap();
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/scanner.py"), "def scan(): pass\n").unwrap();
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {args:?} failed");
}

/// Initialize a git repo with a minimal Python project and an initial commit.
fn init_git_project(dir: &Path) {
    write_python_project(dir);
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
}

// ── Plan Ordering Tests ──

#[test]
fn default_plan_runs_steps_in_contract_order() {
    let kinds: Vec<StepKind> = default_plan().steps().iter().map(|s| s.kind()).collect();

    assert_eq!(
        kinds,
        vec![
            StepKind::Workdir,
            StepKind::InstallTools,
            StepKind::CopyManifest,
            StepKind::InstallDependencies,
            StepKind::CopyApplication,
            StepKind::ProvisionDataDir,
        ]
    );
}

#[test]
fn install_phase_precedes_stage_phase() {
    let phases: Vec<Phase> = default_plan().steps().iter().map(|s| s.phase()).collect();
    let first_stage = phases.iter().position(|p| *p == Phase::Stage).unwrap();

    assert!(phases[..first_stage].iter().all(|p| *p == Phase::Install));
    assert!(phases[first_stage..].iter().all(|p| *p == Phase::Stage));
}

#[test]
fn empty_build_tools_skip_toolchain_step() {
    let config = BuildConfig {
        build_tools: vec![],
        ..Default::default()
    };
    let plan = BuildPlan::from_config(&config).unwrap();

    assert!(!plan.contains(StepKind::InstallTools));
    assert_eq!(plan.steps().len(), 5);
}

#[test]
fn rejects_application_copy_before_dependency_install() {
    let steps = vec![
        BuildStep::Workdir {
            path: "/app".to_owned(),
        },
        BuildStep::CopyManifest {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::CopyApplication,
        BuildStep::InstallDependencies {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::ProvisionDataDir {
            path: "data".to_owned(),
        },
    ];

    assert_eq!(
        BuildPlan::new("python:3.11-slim", steps),
        Err(PlanError::OutOfOrder {
            step: StepKind::InstallDependencies,
            after: StepKind::CopyApplication,
        })
    );
}

#[test]
fn rejects_plan_without_data_dir() {
    let steps = vec![
        BuildStep::Workdir {
            path: "/app".to_owned(),
        },
        BuildStep::CopyManifest {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::InstallDependencies {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::CopyApplication,
    ];

    assert_eq!(
        BuildPlan::new("python:3.11-slim", steps),
        Err(PlanError::MissingStep(StepKind::ProvisionDataDir))
    );
}

#[test]
fn rejects_duplicate_step() {
    let steps = vec![
        BuildStep::Workdir {
            path: "/app".to_owned(),
        },
        BuildStep::CopyManifest {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::InstallDependencies {
            manifest: "requirements.txt".to_owned(),
        },
        BuildStep::CopyApplication,
        BuildStep::CopyApplication,
        BuildStep::ProvisionDataDir {
            path: "data".to_owned(),
        },
    ];

    assert_eq!(
        BuildPlan::new("python:3.11-slim", steps),
        Err(PlanError::DuplicateStep(StepKind::CopyApplication))
    );
}

// ── Layer Cache Tests ──

#[test]
fn app_file_change_keeps_install_layers() {
    let plan = default_plan();
    let manifest: &[u8] = b"foo==1.0\n";
    let before = plan.layers(&inputs(
        manifest,
        &[("requirements.txt", manifest), ("main.py", &b"print(1)"[..])],
    ));
    let after = plan.layers(&inputs(
        manifest,
        &[("requirements.txt", manifest), ("main.py", &b"print(2)"[..])],
    ));

    for (b, a) in before.iter().zip(&after) {
        match b.phase {
            Phase::Install => assert_eq!(b.key, a.key, "install layer {} changed", b.kind),
            Phase::Stage => assert_ne!(b.key, a.key, "stage layer {} unchanged", b.kind),
        }
    }
}

#[test]
fn manifest_change_invalidates_dependency_install() {
    let plan = default_plan();
    let before = plan.layers(&inputs(b"foo==1.0\n", &[("main.py", &b"x"[..])]));
    let after = plan.layers(&inputs(b"foo==1.1\n", &[("main.py", &b"x"[..])]));

    let key = |layers: &[keel_build::Layer], kind: StepKind| {
        layers.iter().find(|l| l.kind == kind).unwrap().key.clone()
    };

    assert_eq!(key(&before, StepKind::Workdir), key(&after, StepKind::Workdir));
    assert_eq!(
        key(&before, StepKind::InstallTools),
        key(&after, StepKind::InstallTools)
    );
    assert_ne!(
        key(&before, StepKind::CopyManifest),
        key(&after, StepKind::CopyManifest)
    );
    assert_ne!(
        key(&before, StepKind::InstallDependencies),
        key(&after, StepKind::InstallDependencies)
    );
}

#[test]
fn build_tool_change_invalidates_everything_after_workdir() {
    let inputs = inputs(b"foo==1.0\n", &[("main.py", &b"x"[..])]);
    let gcc = default_plan().layers(&inputs);
    let clang = BuildPlan::from_config(&BuildConfig {
        build_tools: vec!["clang".to_owned()],
        ..Default::default()
    })
    .unwrap()
    .layers(&inputs);

    assert_eq!(gcc[0].key, clang[0].key);
    for (a, b) in gcc.iter().zip(&clang).skip(1) {
        assert_ne!(a.key, b.key);
    }
}

#[test]
fn layer_keys_are_deterministic() {
    let plan = default_plan();
    let inputs = inputs(b"foo==1.0\n", &[("main.py", &b"x"[..])]);

    assert_eq!(plan.layers(&inputs), plan.layers(&inputs));
    assert!(plan.layers(&inputs)[0].key.as_str().starts_with("sha256:"));
}

#[test]
fn layer_inputs_read_from_project() {
    let tmp = TempDir::new().unwrap();
    write_python_project(tmp.path());
    let files = application_files(tmp.path(), "data").unwrap();

    let from_disk =
        LayerInputs::from_project(tmp.path(), Path::new("requirements.txt"), &files).unwrap();

    assert_eq!(from_disk.manifest, ContentDigest::of(b"foo==1.0\n"));
}

proptest! {
    #[test]
    fn install_layers_stable_under_any_app_change(
        a in proptest::collection::vec(("[a-z]{1,8}\\.py", proptest::collection::vec(any::<u8>(), 0..64)), 0..8),
        b in proptest::collection::vec(("[a-z]{1,8}\\.py", proptest::collection::vec(any::<u8>(), 0..64)), 0..8),
    ) {
        let plan = default_plan();
        let manifest = b"foo==1.0\n";
        let digest = |files: &[(String, Vec<u8>)]| LayerInputs {
            manifest: ContentDigest::of(manifest),
            application: ContentDigest::of_file_set(
                files.iter().map(|(p, c)| (Path::new(p.as_str()), c.as_slice())),
            ),
        };

        let before = plan.layers(&digest(&a));
        let after = plan.layers(&digest(&b));

        for (x, y) in before.iter().zip(&after) {
            if x.phase == Phase::Install {
                prop_assert_eq!(&x.key, &y.key);
            }
        }
    }
}

// ── Dockerfile Generation Tests ──

fn render(config: &KeelConfig) -> String {
    let plan = BuildPlan::from_config(&config.build).unwrap();
    DockerfileGenerator::new(config, &plan).render()
}

fn line_index(output: &str, needle: &str) -> usize {
    output
        .lines()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("missing line containing {needle:?}:\n{output}"))
}

#[test]
fn dockerfile_follows_step_order() {
    let output = render(&KeelConfig::default());

    let order = [
        "FROM python:3.11-slim",
        "WORKDIR /app",
        "apt-get install -y --no-install-recommends gcc",
        "COPY requirements.txt .",
        "RUN pip install --no-cache-dir -r requirements.txt",
        "COPY . .",
        "RUN mkdir -p data",
        "ENV PYTHONUNBUFFERED=1",
        "ENV PYTHONDONTWRITEBYTECODE=1",
        "CMD [\"python\", \"main.py\"]",
    ];
    let positions: Vec<usize> = order.iter().map(|n| line_index(&output, n)).collect();

    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {positions:?}\n{output}"
    );
}

#[test]
fn dockerfile_cleans_package_index() {
    let output = render(&KeelConfig::default());
    assert!(output.contains("rm -rf /var/lib/apt/lists/*"));
}

#[test]
fn dockerfile_no_apt_when_no_build_tools() {
    let mut config = KeelConfig::default();
    config.build.build_tools.clear();

    assert!(!render(&config).contains("apt-get"));
}

#[test]
fn dockerfile_uses_configured_values() {
    let mut config = KeelConfig::default();
    config.build.base_image = "python:3.12-alpine".to_owned();
    config.build.build_tools = vec!["gcc".to_owned(), "musl-dev".to_owned()];
    config.build.manifest = "deps/requirements.txt".to_owned();
    config.build.workdir = "/srv".to_owned();
    config.build.data_dir = "state".to_owned();
    config.runtime.entrypoint = vec!["python".to_owned(), "-m".to_owned(), "bot".to_owned()];
    config.runtime.port = Some(8000);
    let output = render(&config);

    assert!(output.contains("FROM python:3.12-alpine\n"));
    assert!(output.contains("apt-get install -y --no-install-recommends gcc musl-dev"));
    assert!(output.contains("COPY deps/requirements.txt deps/requirements.txt\n"));
    assert!(output.contains("RUN pip install --no-cache-dir -r deps/requirements.txt\n"));
    assert!(output.contains("WORKDIR /srv\n"));
    assert!(output.contains("RUN mkdir -p state\n"));
    assert!(output.contains("EXPOSE 8000\n"));
    assert!(output.contains("CMD [\"python\", \"-m\", \"bot\"]\n"));
}

#[test]
fn dockerfile_omits_disabled_flags() {
    let mut config = KeelConfig::default();
    config.runtime.unbuffered = false;
    config.runtime.no_bytecode = false;
    let output = render(&config);

    assert!(!output.contains("PYTHONUNBUFFERED"));
    assert!(!output.contains("PYTHONDONTWRITEBYTECODE"));
}

#[test]
fn dockerfile_env_lines_sorted_by_key() {
    let mut config = KeelConfig::default();
    config.build.env.insert("TZ".to_owned(), "UTC".to_owned());
    config.build.env.insert("APP_MODE".to_owned(), "prod".to_owned());
    let output = render(&config);

    assert!(line_index(&output, "ENV APP_MODE=prod") < line_index(&output, "ENV TZ=UTC"));
    assert!(line_index(&output, "ENV PYTHONDONTWRITEBYTECODE=1") < line_index(&output, "ENV APP_MODE"));
}

#[test]
fn dockerfile_env_values_stay_literal() {
    let mut config = KeelConfig::default();
    config
        .build
        .env
        .insert("DB_PASSWORD".to_owned(), "pa$word".to_owned());
    config
        .build
        .env
        .insert("GREETING".to_owned(), "say \"hi\" from C:\\tmp".to_owned());
    let output = render(&config);

    assert!(output.contains("ENV DB_PASSWORD=\"pa\\$word\"\n"), "{output}");
    assert!(
        output.contains("ENV GREETING=\"say \\\"hi\\\" from C:\\\\tmp\"\n"),
        "{output}"
    );
}

#[test]
fn dockerfile_no_expose_by_default() {
    assert!(!render(&KeelConfig::default()).contains("EXPOSE"));
}

// ── Failure Classification Tests ──

#[test]
fn pip_failure_maps_to_dependency_install() {
    let output = "\
#8 [4/6] RUN pip install --no-cache-dir -r requirements.txt
#8 1.203 ERROR: Could not find a version that satisfies the requirement doesnotexist==0.0
#8 ERROR: process \"/bin/sh -c pip install --no-cache-dir -r requirements.txt\" did not complete successfully: exit code: 1
ERROR: failed to solve: process \"/bin/sh -c pip install --no-cache-dir -r requirements.txt\" did not complete successfully: exit code: 1
";
    let err = BuildError::from_output(&default_plan(), output);

    assert_eq!(err.step(), Some(StepKind::InstallDependencies));
    assert!(matches!(
        err,
        BuildError::StepFailed {
            phase: Phase::Install,
            ..
        }
    ));
}

#[test]
fn apt_failure_maps_to_tool_install() {
    let output = "ERROR: failed to solve: process \"/bin/sh -c apt-get update     && apt-get install -y --no-install-recommends gcc     && rm -rf /var/lib/apt/lists/*\" did not complete successfully: exit code: 100";
    let err = BuildError::from_output(&default_plan(), output);

    assert_eq!(err.step(), Some(StepKind::InstallTools));
}

#[test]
fn legacy_builder_failure_is_classified() {
    let output = "The command '/bin/sh -c pip install --no-cache-dir -r requirements.txt' returned a non-zero code: 1";
    let err = BuildError::from_output(&default_plan(), output);

    assert_eq!(err.step(), Some(StepKind::InstallDependencies));
}

#[test]
fn missing_manifest_copy_is_classified() {
    let output = "ERROR: failed to solve: failed to compute cache key: failed to calculate checksum of ref abc::def: \"/requirements.txt\": not found";
    let err = BuildError::from_output(&default_plan(), output);

    assert_eq!(err.step(), Some(StepKind::CopyManifest));
}

#[test]
fn unknown_failure_is_reported_verbatim() {
    let err = BuildError::from_output(
        &default_plan(),
        "ERROR: Cannot connect to the Docker daemon\n\n",
    );

    assert_eq!(err.step(), None);
    assert!(err.to_string().contains("Cannot connect to the Docker daemon"));
}

// ── Context Tests ──

#[test]
fn context_contains_files_and_dockerfile() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());

    let files = application_files(tmp.path(), "data").unwrap();
    let context = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap();

    assert_eq!(context, tmp.path().join(CONTEXT_DIR));
    assert!(context.join("requirements.txt").exists());
    assert!(context.join("main.py").exists());
    assert!(context.join("src/scanner.py").exists());
    assert_eq!(
        std::fs::read_to_string(context.join("Dockerfile")).unwrap(),
        "FROM scratch\n"
    );
}

#[test]
fn context_respects_gitignore() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::write(tmp.path().join(".gitignore"), ".env\n__pycache__/\n").unwrap();
    std::fs::write(tmp.path().join(".env"), "BOT_TOKEN=secret\n").unwrap();
    std::fs::create_dir_all(tmp.path().join("__pycache__")).unwrap();
    std::fs::write(tmp.path().join("__pycache__/main.cpython-311.pyc"), b"\0").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();

    assert!(files.contains(&PathBuf::from(".gitignore")));
    assert!(!files.contains(&PathBuf::from(".env")));
    assert!(!files.iter().any(|f| f.starts_with("__pycache__")));
}

#[test]
fn context_includes_untracked_non_ignored_files() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::write(tmp.path().join("telegram.py"), "# new module\n").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();
    assert!(files.contains(&PathBuf::from("telegram.py")));
}

#[test]
fn context_skips_runtime_state_but_keeps_tracked_seed_data() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("data")).unwrap();
    std::fs::write(tmp.path().join("data/topics.json"), "{}").unwrap();
    git(tmp.path(), &["add", "data/topics.json"]);
    git(tmp.path(), &["commit", "-m", "seed"]);
    // Written by a local run, never committed
    std::fs::write(tmp.path().join("data/state.db"), b"rows").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();

    assert!(files.contains(&PathBuf::from("data/topics.json")));
    assert!(!files.contains(&PathBuf::from("data/state.db")));
}

#[test]
fn context_keeps_non_ascii_file_names() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::write(tmp.path().join("café.py"), "print('bonjour')\n").unwrap();
    git(tmp.path(), &["add", "café.py"]);
    git(tmp.path(), &["commit", "-m", "accents"]);
    std::fs::write(tmp.path().join("données.csv"), "x,y\n").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();
    let context = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap();

    assert!(files.contains(&PathBuf::from("café.py")));
    assert!(files.contains(&PathBuf::from("données.csv")));
    assert_eq!(
        std::fs::read_to_string(context.join("café.py")).unwrap(),
        "print('bonjour')\n"
    );
}

#[test]
fn context_skips_untracked_non_ascii_state() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("data")).unwrap();
    std::fs::write(tmp.path().join("data/état.json"), "{}").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();
    assert!(!files.iter().any(|f| f.starts_with("data")));
}

#[test]
fn dot_prefixed_data_dir_matches_in_git() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("data")).unwrap();
    std::fs::write(tmp.path().join("data/state.db"), b"rows").unwrap();

    let files = application_files(tmp.path(), "./data").unwrap();
    assert!(!files.contains(&PathBuf::from("data/state.db")));
}

#[test]
fn context_excludes_keel_directories() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join(".keel")).unwrap();
    std::fs::write(tmp.path().join(".keel/Dockerfile"), "FROM x").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();
    let context = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap();

    assert!(!files.iter().any(|f| f.starts_with(".keel")));
    assert!(!context.join(".keel").exists());
    assert!(!context.join(".git").exists());
}

#[test]
fn context_is_rebuilt_from_scratch() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());

    let files = application_files(tmp.path(), "data").unwrap();
    let context = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap();
    std::fs::create_dir_all(context.join("data")).unwrap();
    std::fs::write(context.join("data/state.db"), b"old").unwrap();

    let context = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap();
    assert!(!context.join("data/state.db").exists());
}

#[test]
fn context_requires_manifest() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    git(tmp.path(), &["rm", "-q", "requirements.txt"]);

    let files = application_files(tmp.path(), "data").unwrap();
    let err = create_context(tmp.path(), &files, "requirements.txt", "FROM scratch\n").unwrap_err();

    assert!(err.to_string().contains("requirements.txt"));
    assert!(!tmp.path().join(CONTEXT_DIR).exists());
}

#[test]
fn walks_tree_outside_git() {
    let tmp = TempDir::new().unwrap();
    write_python_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("data")).unwrap();
    std::fs::write(tmp.path().join("data/pixels.csv"), "x,y\n").unwrap();

    let files = application_files(tmp.path(), "data").unwrap();

    assert_eq!(
        files,
        vec![
            PathBuf::from("main.py"),
            PathBuf::from("requirements.txt"),
            PathBuf::from("src/scanner.py"),
        ]
    );
}

#[test]
fn dot_prefixed_data_dir_is_skipped_outside_git() {
    let tmp = TempDir::new().unwrap();
    write_python_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("data")).unwrap();
    std::fs::write(tmp.path().join("data/state.db"), b"rows").unwrap();

    let files = application_files(tmp.path(), "./data").unwrap();

    assert!(!files.iter().any(|f| f.starts_with("data")));
    assert!(files.contains(&PathBuf::from("main.py")));
}

#[test]
fn remove_context_reports_presence() {
    let tmp = TempDir::new().unwrap();
    assert!(!remove_context(tmp.path()).unwrap());

    std::fs::create_dir_all(tmp.path().join(CONTEXT_DIR)).unwrap();
    assert!(remove_context(tmp.path()).unwrap());
    assert!(!tmp.path().join(CONTEXT_DIR).exists());
}

// ── Eject Tests ──

#[test]
fn eject_writes_dockerfile() {
    let tmp = TempDir::new().unwrap();

    let path = eject(tmp.path(), "FROM python:3.11-slim\n").unwrap();

    assert_eq!(path, tmp.path().join(".keel/Dockerfile"));
    assert!(is_ejected(tmp.path()));
    assert_eq!(
        load_ejected_dockerfile(tmp.path()).unwrap(),
        "FROM python:3.11-slim\n"
    );
}

#[test]
fn eject_refuses_to_overwrite() {
    let tmp = TempDir::new().unwrap();
    eject(tmp.path(), "FROM a\n").unwrap();

    let err = eject(tmp.path(), "FROM b\n").unwrap_err();

    assert!(matches!(err, EjectError::AlreadyEjected(_)));
    assert_eq!(load_ejected_dockerfile(tmp.path()).unwrap(), "FROM a\n");
}

#[test]
fn not_ejected_by_default() {
    let tmp = TempDir::new().unwrap();
    assert!(!is_ejected(tmp.path()));
    assert!(load_ejected_dockerfile(tmp.path()).is_err());
}
