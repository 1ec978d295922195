/// Label written on every backend unit created by this tool.
///
/// Ownership checks during create look for this label; units without it belong to somebody else.
pub const LABEL_CREATED_BY: &str = "created_by.minikube.sigs.k8s.io";
/// Label carrying the profile (cluster) name of a backend unit.
pub const LABEL_PROFILE: &str = "name.minikube.sigs.k8s.io";
/// Label carrying the machine name of a backend unit.
pub const LABEL_NODE: &str = "role.minikube.sigs.k8s.io";

/// Marker exported to helper processes spawned by the tool.
pub const CHILD_PROCESS_ENV: &str = "IS_MINIKUBE_CHILD_PROCESS";
/// Overrides the home directory (`~/.minikube`).
pub const HOME_ENV: &str = "MINIKUBE_HOME";

pub const DEFAULT_PROFILE: &str = "minikube";
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.18.3";
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
pub const DEFAULT_API_SERVER_PORT: u16 = 8443;
/// `/etc/hosts` name of the control plane inside every node.
pub const CONTROL_PLANE_ALIAS: &str = "control-plane.minikube.internal";
pub const DEFAULT_ENGINE_INSTALL_URL: &str = "https://get.docker.com";

/// KIC base image version.
pub const KIC_VERSION: &str = "v0.0.10";
const KIC_BASE_IMAGE_SHA: &str =
    "f58e0c4662bac8a9b5dda7984b185bad8502ade5d9fa364bf2755d636ab51438";

/// Primary base image for container-as-node units.
pub fn base_image() -> String {
    format!("registry.cn-hangzhou.aliyuncs.com/google_containers/kicbase:{KIC_VERSION}@sha256:{KIC_BASE_IMAGE_SHA}")
}

/// First fallback: the same image mirrored on Docker Hub.
pub fn base_image_fallback_1() -> String {
    format!("kicbase/stable:{KIC_VERSION}@sha256:{KIC_BASE_IMAGE_SHA}")
}

/// Second fallback: GitHub packages, which cannot pull by digest.
pub fn base_image_fallback_2() -> String {
    format!("docker.pkg.github.com/kubernetes/minikube/kicbase:{KIC_VERSION}")
}

/// Layout version of preloaded image tarballs.
pub const PRELOAD_VERSION: &str = "v3";

/// File name of the preloaded images tarball for a Kubernetes version, runtime and architecture.
pub fn preload_tarball_name(kubernetes_version: &str, container_runtime: &str, arch: &str) -> String {
    format!(
        "preloaded-images-k8s-{PRELOAD_VERSION}-{kubernetes_version}-{container_runtime}-overlay2-{arch}.tar.lz4"
    )
}

pub const GUEST_ADDONS_DIR: &str = "/etc/kubernetes/addons";
pub const GUEST_MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";
pub const GUEST_EPHEMERAL_DIR: &str = "/var/tmp/minikube";
pub const GUEST_PERSISTENT_DIR: &str = "/var/lib/minikube";
pub const GUEST_KUBERNETES_CERTS_DIR: &str = "/var/lib/minikube/certs";
pub const GUEST_IMAGES_DIR: &str = "/var/lib/minikube/images";
pub const GUEST_BINARIES_DIR: &str = "/var/lib/minikube/binaries";
pub const GUEST_GVISOR_DIR: &str = "/tmp/gvisor";
pub const GUEST_CERT_AUTH_DIR: &str = "/usr/share/ca-certificates";
pub const GUEST_CERT_STORE_DIR: &str = "/etc/ssl/certs";

/// Directories created inside every unit by post-start setup.
pub const REQUIRED_DIRECTORIES: [&str; 10] = [
    GUEST_ADDONS_DIR,
    GUEST_MANIFESTS_DIR,
    GUEST_EPHEMERAL_DIR,
    GUEST_PERSISTENT_DIR,
    GUEST_KUBERNETES_CERTS_DIR,
    GUEST_IMAGES_DIR,
    GUEST_BINARIES_DIR,
    GUEST_GVISOR_DIR,
    GUEST_CERT_AUTH_DIR,
    GUEST_CERT_STORE_DIR,
];
