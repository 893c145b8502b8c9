//! Manifest builders for the runtime Deployment/Service pair and the
//! ephemeral build/cleanup Jobs.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use opr_executor_shared::config::StorageConfig;
use opr_executor_shared::runtime::{
    deployment_name, service_name, RuntimeVersion, ANNOTATION_PREFIX, ROLE_BUILD, ROLE_LABEL,
    ROLE_RUNTIME, RUNTIME_ID_LABEL, RUNTIME_PORT,
};

/// Container names are fixed; the log streamer and command endpoint exec by name.
pub const RUNTIME_CONTAINER: &str = "runtime-container";
pub const BUILD_CONTAINER: &str = "build-container";
const SOURCE_INIT_CONTAINER: &str = "source-init";

/// Where v4/v5 builders write `script(1)` output.
pub const BUILD_LOG_DIR: &str = "/tmp/logging";
pub const BUILD_LOG_FILE: &str = "/tmp/logging/logs.txt";
pub const BUILD_TIMING_FILE: &str = "/tmp/logging/timings.txt";
/// v2 builders tee into a single file instead.
pub const V2_LOG_FILE: &str = "/var/tmp/logs.txt";
/// Where v5 runtimes write per-execution logs.
pub const EXECUTION_LOG_DIR: &str = "/mnt/logs";

const SOURCE_VOLUME: &str = "code";
const SOURCE_MOUNT: &str = "/mnt/code";
const SOURCE_ARCHIVE: &str = "/mnt/code/source.tar.gz";

/// Jobs are garbage-collected by the cluster this long after finishing.
const JOB_TTL_SECONDS: i32 = 600;

/// Parameters for the runtime Deployment.
pub struct RuntimeDeploymentSpec<'a> {
    pub runtime_id: &'a str,
    pub image: &'a str,
    pub version: RuntimeVersion,
    pub secret: &'a str,
    pub hostname: &'a str,
    pub variables: &'a BTreeMap<String, String>,
    pub cpus: Option<f64>,
    pub memory_mib: Option<i64>,
    pub artifact_path: Option<&'a str>,
    pub created: i64,
}

/// Parameters for a build Job.
pub struct BuildJobSpec<'a> {
    pub runtime_id: &'a str,
    pub job_name: &'a str,
    pub image: &'a str,
    pub version: RuntimeVersion,
    pub command: &'a str,
    pub variables: &'a BTreeMap<String, String>,
    /// Whole source tarball, base64-encoded, handed to the init container.
    pub source_b64: Option<&'a str>,
    /// Bucket key the artifact is uploaded to.
    pub artifact_key: &'a str,
    pub storage: &'a StorageConfig,
    pub cpus: Option<f64>,
    pub memory_mib: Option<i64>,
}

fn labels(runtime_id: &str, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ROLE_LABEL.to_string(), role.to_string()),
        (RUNTIME_ID_LABEL.to_string(), runtime_id.to_string()),
    ])
}

fn env_vars(variables: &BTreeMap<String, String>) -> Vec<EnvVar> {
    variables
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect()
}

fn resources(cpus: Option<f64>, memory_mib: Option<i64>) -> Option<ResourceRequirements> {
    let mut limits = BTreeMap::new();
    if let Some(cpus) = cpus {
        limits.insert("cpu".to_string(), Quantity(format!("{}m", (cpus * 1000.0) as i64)));
    }
    if let Some(memory) = memory_mib {
        limits.insert("memory".to_string(), Quantity(format!("{memory}Mi")));
    }
    if limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(limits.clone()),
        limits: Some(limits),
        ..Default::default()
    })
}

/// Single-quote a string for `sh -c`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Initial annotation set stamped onto a new runtime Deployment.
fn runtime_annotations(spec: &RuntimeDeploymentSpec<'_>) -> BTreeMap<String, String> {
    use opr_executor_shared::runtime::fields;

    let mut annotations = BTreeMap::from([
        (fields::VERSION, spec.version.to_string()),
        (fields::SECRET, spec.secret.to_string()),
        (fields::HOSTNAME, spec.hostname.to_string()),
        (fields::CREATED, spec.created.to_string()),
        (fields::UPDATED, spec.created.to_string()),
        (fields::STATUS, opr_executor_shared::runtime::STATUS_PENDING.to_string()),
        (fields::INITIALISED, "0".to_string()),
        (fields::LISTENING, "0".to_string()),
        (fields::LAST_EXECUTION_TIME, spec.created.to_string()),
    ]);
    if let Some(path) = spec.artifact_path {
        annotations.insert(fields::ARTIFACT_PATH, path.to_string());
    }

    annotations
        .into_iter()
        .map(|(field, value)| (format!("{ANNOTATION_PREFIX}{field}"), value))
        .collect()
}

/// Deployment for a runtime, created cold (`replicas = 0`).
pub fn runtime_deployment(spec: &RuntimeDeploymentSpec<'_>) -> Deployment {
    let pod_labels = labels(spec.runtime_id, ROLE_RUNTIME);

    Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(spec.runtime_id)),
            labels: Some(pod_labels.clone()),
            annotations: Some(runtime_annotations(spec)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    RUNTIME_ID_LABEL.to_string(),
                    spec.runtime_id.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: RUNTIME_CONTAINER.to_string(),
                        image: Some(spec.image.to_string()),
                        env: Some(env_vars(spec.variables)),
                        ports: Some(vec![k8s_openapi::api::core::v1::ContainerPort {
                            container_port: i32::from(RUNTIME_PORT),
                            ..Default::default()
                        }]),
                        resources: resources(spec.cpus, spec.memory_mib),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "logs".to_string(),
                            mount_path: EXECUTION_LOG_DIR.to_string(),
                            ..Default::default()
                        }]),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "logs".to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Service fronting a runtime's pods on port 3000.
pub fn runtime_service(runtime_id: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(service_name(runtime_id)),
            labels: Some(labels(runtime_id, ROLE_RUNTIME)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                RUNTIME_ID_LABEL.to_string(),
                runtime_id.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                port: i32::from(RUNTIME_PORT),
                target_port: Some(IntOrString::Int(i32::from(RUNTIME_PORT))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Shell script the build container runs: unpack, build under log capture,
/// pack and upload the artifact.
pub fn build_script(version: RuntimeVersion, command: &str, artifact_key: &str) -> String {
    let quoted = shell_quote(command);
    let capture = match version {
        RuntimeVersion::V2 => format!("( sh -c {quoted} ) 2>&1 | tee {V2_LOG_FILE}"),
        _ => format!(
            "script --log-out {BUILD_LOG_FILE} --log-timing {BUILD_TIMING_FILE} --return --quiet --command {quoted}"
        ),
    };

    format!(
        "set -e\n\
         mkdir -p {BUILD_LOG_DIR} /usr/code\n\
         if [ -f {SOURCE_ARCHIVE} ]; then tar -xzf {SOURCE_ARCHIVE} -C /usr/code; fi\n\
         cd /usr/code\n\
         {capture}\n\
         tar -czf /tmp/artifact.tar.gz -C /usr/code .\n\
         aws s3 cp /tmp/artifact.tar.gz \"s3://${{S3_BUCKET}}/{artifact_key}\" --endpoint-url \"$S3_ENDPOINT\"\n"
    )
}

fn storage_env(storage: &StorageConfig) -> Vec<EnvVar> {
    let plain = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    };

    vec![
        plain("AWS_ACCESS_KEY_ID", &storage.access_key_id),
        plain("AWS_SECRET_ACCESS_KEY", &storage.secret_access_key),
        plain("AWS_DEFAULT_REGION", &storage.region),
        plain("S3_ENDPOINT", &storage.endpoint),
        plain("S3_BUCKET", &storage.bucket),
    ]
}

/// Build Job: an optional init container materializes the source tarball
/// from a base64 env variable, then the build container runs the wrapped
/// command and uploads the artifact.
pub fn build_job(spec: &BuildJobSpec<'_>) -> Job {
    let mut env = env_vars(spec.variables);
    env.extend(storage_env(spec.storage));

    let source_mount = VolumeMount {
        name: SOURCE_VOLUME.to_string(),
        mount_path: SOURCE_MOUNT.to_string(),
        ..Default::default()
    };

    let init_containers = spec.source_b64.map(|source| {
        vec![Container {
            name: SOURCE_INIT_CONTAINER.to_string(),
            image: Some(spec.image.to_string()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("echo \"$OPR_SOURCE_B64\" | base64 -d > {SOURCE_ARCHIVE}"),
            ]),
            env: Some(vec![EnvVar {
                name: "OPR_SOURCE_B64".to_string(),
                value: Some(source.to_string()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![source_mount.clone()]),
            ..Default::default()
        }]
    });

    let script = build_script(spec.version, spec.command, spec.artifact_key);

    Job {
        metadata: ObjectMeta {
            name: Some(spec.job_name.to_string()),
            labels: Some(labels(spec.runtime_id, ROLE_BUILD)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(spec.runtime_id, ROLE_BUILD)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    init_containers,
                    containers: vec![Container {
                        name: BUILD_CONTAINER.to_string(),
                        image: Some(spec.image.to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                        env: Some(env),
                        resources: resources(spec.cpus, spec.memory_mib),
                        volume_mounts: Some(vec![source_mount]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: SOURCE_VOLUME.to_string(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Cleanup Job removing every artifact under the runtime's bucket prefix.
/// Best-effort; failures never fail the parent delete.
pub fn cleanup_job(runtime_id: &str, job_name: &str, storage: &StorageConfig) -> Job {
    let script = format!(
        "aws s3 rm \"s3://${{S3_BUCKET}}/{runtime_id}/\" --recursive --endpoint-url \"$S3_ENDPOINT\""
    );

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            labels: Some(labels(runtime_id, "cleanup")),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "cleanup-container".to_string(),
                        image: Some("amazon/aws-cli:2".to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                        env: Some(storage_env(storage)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> StorageConfig {
        StorageConfig {
            endpoint: "http://minio:9000".to_string(),
            bucket: "artifacts".to_string(),
            access_key_id: "access".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn variables() -> BTreeMap<String, String> {
        BTreeMap::from([("CI".to_string(), "true".to_string())])
    }

    #[test]
    fn deployment_starts_cold_with_pending_annotations() {
        let vars = variables();
        let deployment = runtime_deployment(&RuntimeDeploymentSpec {
            runtime_id: "r1",
            image: "img:v5",
            version: RuntimeVersion::V5,
            secret: "s",
            hostname: "h",
            variables: &vars,
            cpus: Some(0.5),
            memory_mib: Some(256),
            artifact_path: Some("r1/b.tar.gz"),
            created: 1000,
        });

        assert_eq!(deployment.metadata.name.as_deref(), Some("dep-r1"));
        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(0));

        let annotations = deployment.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get("appwrite.io/status").unwrap(), "pending");
        assert_eq!(annotations.get("appwrite.io/initialised").unwrap(), "0");
        assert_eq!(annotations.get("appwrite.io/artifact-path").unwrap(), "r1/b.tar.gz");

        let labels = deployment.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("role").unwrap(), "runtime");
        assert_eq!(labels.get("runtime-id").unwrap(), "r1");

        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.name, RUNTIME_CONTAINER);
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu").unwrap().0, "500m");
        assert_eq!(limits.get("memory").unwrap().0, "256Mi");
    }

    #[test]
    fn service_selects_runtime_pods() {
        let service = runtime_service("r1");
        assert_eq!(service.metadata.name.as_deref(), Some("svc-r1"));
        let spec = service.spec.as_ref().unwrap();
        assert_eq!(
            spec.selector.as_ref().unwrap().get("runtime-id").unwrap(),
            "r1"
        );
        assert_eq!(spec.ports.as_ref().unwrap()[0].port, 3000);
    }

    #[test]
    fn v5_build_script_uses_script_capture() {
        let script = build_script(RuntimeVersion::V5, "npm install", "r1/b.tar.gz");
        assert!(script.contains("--log-out /tmp/logging/logs.txt"));
        assert!(script.contains("--log-timing /tmp/logging/timings.txt"));
        assert!(script.contains("'npm install'"));
        assert!(script.contains("s3://${S3_BUCKET}/r1/b.tar.gz"));
    }

    #[test]
    fn v2_build_script_tees_into_logfile() {
        let script = build_script(RuntimeVersion::V2, "composer install", "r1/b.tar.gz");
        assert!(script.contains("tee /var/tmp/logs.txt"));
        assert!(!script.contains("--log-timing"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), "'echo '\\''hi'\\'''");
    }

    #[test]
    fn build_job_shape() {
        let vars = variables();
        let job = build_job(&BuildJobSpec {
            runtime_id: "r2",
            job_name: "build-r2-0a1b2c3d",
            image: "img:v5",
            version: RuntimeVersion::V5,
            command: "echo hi",
            variables: &vars,
            source_b64: Some("c29tZQ=="),
            artifact_key: "r2/b.tar.gz",
            storage: &storage(),
            cpus: None,
            memory_mib: None,
        });

        assert_eq!(job.metadata.name.as_deref(), Some("build-r2-0a1b2c3d"));
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert!(spec.ttl_seconds_after_finished.is_some());

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.init_containers.as_ref().unwrap().len(), 1);
        assert_eq!(pod.containers[0].name, BUILD_CONTAINER);

        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("role").unwrap(), "build");
        assert_eq!(labels.get("runtime-id").unwrap(), "r2");
    }

    #[test]
    fn build_job_without_source_has_no_init_container() {
        let vars = variables();
        let job = build_job(&BuildJobSpec {
            runtime_id: "r2",
            job_name: "build-r2-0a1b2c3d",
            image: "img:v5",
            version: RuntimeVersion::V5,
            command: "echo hi",
            variables: &vars,
            source_b64: None,
            artifact_key: "r2/b.tar.gz",
            storage: &storage(),
            cpus: None,
            memory_mib: None,
        });

        assert!(job.spec.unwrap().template.spec.unwrap().init_containers.is_none());
    }

    #[test]
    fn cleanup_job_removes_prefix() {
        let job = cleanup_job("r3", "delete-r3-0a1b2c3d", &storage());
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let command = pod.containers[0].command.as_ref().unwrap();
        assert!(command[2].contains("s3://${S3_BUCKET}/r3/"));
        assert!(command[2].contains("--recursive"));
    }
}
