//! Well-known binaries probed on `PATH`, grouped by category.

use super::ToolCategory;

/// A language runtime and the arguments that print its version.
pub struct RuntimeProbe {
    pub binary: &'static str,
    pub version_args: &'static [&'static str],
}

/// A development tool worth describing to the model.
pub struct DevToolProbe {
    pub binary: &'static str,
    pub description: &'static str,
}

const PACKAGE_MANAGERS: &[&str] = &[
    "apt", "apt-get", "aptitude", "dpkg", "yum", "dnf", "rpm", "zypper", "pacman", "yay", "paru",
    "apk", "emerge", "xbps-install", "nix", "nix-env", "guix", "snap", "flatpak", "brew", "port",
    "pkg", "pkgin", "choco", "scoop", "winget", "npm", "npx", "yarn", "pnpm", "bun", "pip", "pip3",
    "pipx", "poetry", "pdm", "uv", "conda", "mamba", "micromamba", "gem", "bundle", "cargo",
    "rustup", "go", "composer", "maven", "mvn", "gradle", "sbt", "lein", "nuget", "dotnet",
    "cabal", "stack", "opam", "mix", "hex", "cpan", "cpanm", "luarocks", "vcpkg", "conan",
    "pub", "swift", "asdf", "mise", "sdk",
];

const LANGUAGES: &[&str] = &[
    "python", "python3", "node", "deno", "ruby", "perl", "php", "java", "javac", "kotlin",
    "scala", "go", "rustc", "gcc", "g++", "clang", "clang++", "swift", "dotnet", "ghc", "ocaml",
    "elixir", "erl", "lua", "luajit", "R", "Rscript", "julia", "dart", "zig", "nim", "crystal",
    "tclsh", "gfortran", "racket", "sbcl", "clojure",
];

const DEVELOPMENT_TOOLS: &[&str] = &[
    "git", "gh", "glab", "hg", "svn", "make", "cmake", "ninja", "meson", "bazel", "buck2",
    "autoconf", "automake", "pkg-config", "gdb", "lldb", "valgrind", "strace", "ltrace", "perf",
    "vim", "nvim", "emacs", "nano", "code", "helix", "hx", "tmux", "screen", "ctags", "rg",
    "fd", "fzf", "bat", "delta", "jq", "yq", "shellcheck", "shfmt", "prettier", "eslint",
    "black", "ruff", "flake8", "mypy", "pytest", "tox", "pre-commit", "direnv", "just",
    "watchexec", "entr", "hyperfine", "tokei", "cloc", "diff", "patch", "protoc", "buf",
    "sqlc", "swagger-codegen", "openapi-generator", "ansible", "ansible-playbook", "vagrant",
];

const SYSTEM_COMMANDS: &[&str] = &[
    "ls", "cp", "mv", "rm", "mkdir", "rmdir", "touch", "cat", "less", "more", "head", "tail",
    "grep", "egrep", "sed", "awk", "cut", "sort", "uniq", "wc", "tr", "tee", "xargs", "find",
    "locate", "which", "whereis", "file", "stat", "du", "df", "free", "top", "htop", "btop",
    "ps", "pgrep", "pkill", "kill", "killall", "nice", "renice", "nohup", "lsof", "chmod",
    "chown", "chgrp", "ln", "readlink", "realpath", "basename", "dirname", "tar", "gzip",
    "gunzip", "bzip2", "xz", "zstd", "zip", "unzip", "7z", "rsync", "date", "cal", "uptime",
    "uname", "hostname", "whoami", "id", "groups", "env", "printenv", "sudo", "doas", "su",
    "crontab", "systemctl", "journalctl", "service", "launchctl", "mount", "umount", "lsblk",
    "blkid", "fdisk", "parted", "mkfs", "fsck", "dd", "sync", "watch", "time", "timeout",
    "yes", "seq", "shuf", "split", "paste", "join", "comm", "column", "fmt", "fold", "nl",
    "od", "hexdump", "xxd", "strings", "md5sum", "sha1sum", "sha256sum", "shasum", "base64",
    "iconv", "tree", "open", "xdg-open", "pbcopy", "pbpaste", "xclip", "xsel", "trash",
    "diskutil", "sw_vers", "defaults", "mdfind", "dmesg", "lscpu", "lspci", "lsusb",
    "modprobe", "sysctl", "ulimit", "chroot", "useradd", "usermod", "passwd",
];

const CONTAINER_TOOLS: &[&str] = &[
    "docker", "docker-compose", "podman", "podman-compose", "buildah", "skopeo", "nerdctl",
    "containerd", "ctr", "crictl", "kubectl", "kubectx", "kubens", "k9s", "helm", "kustomize",
    "minikube", "kind", "k3d", "k3s", "microk8s", "oc", "istioctl", "linkerd", "argocd",
    "flux", "skaffold", "tilt", "lima", "colima", "dive", "hadolint", "trivy", "ko",
];

const CLOUD_TOOLS: &[&str] = &[
    "aws", "sam", "eksctl", "cdk", "gcloud", "gsutil", "bq", "az", "func", "doctl", "linode-cli",
    "hcloud", "oci", "ibmcloud", "terraform", "tofu", "terragrunt", "pulumi", "packer", "vault",
    "consul", "nomad", "serverless", "vercel", "netlify", "heroku", "fly", "flyctl", "railway",
    "wrangler", "firebase", "supabase", "s3cmd", "rclone",
];

const DATABASE_TOOLS: &[&str] = &[
    "psql", "pg_dump", "pg_restore", "pg_ctl", "createdb", "dropdb", "mysql", "mysqldump",
    "mariadb", "sqlite3", "redis-cli", "redis-server", "mongo", "mongosh", "mongodump",
    "mongorestore", "cqlsh", "influx", "clickhouse-client", "duckdb", "litecli", "pgcli",
    "mycli", "usql", "sqlcmd", "etcdctl", "cockroach", "neo4j", "cypher-shell", "dbmate",
    "flyway", "liquibase", "prisma", "diesel",
];

const NETWORK_TOOLS: &[&str] = &[
    "curl", "wget", "httpie", "http", "xh", "ssh", "scp", "sftp", "ssh-keygen", "ssh-copy-id",
    "mosh", "ping", "ping6", "traceroute", "tracepath", "mtr", "dig", "nslookup", "host",
    "whois", "netstat", "ss", "ip", "ifconfig", "route", "arp", "iptables", "nft", "ufw",
    "firewall-cmd", "nc", "ncat", "netcat", "socat", "telnet", "nmap", "tcpdump", "tshark",
    "wireshark", "iperf", "iperf3", "openssl", "certbot", "mkcert", "ngrok", "cloudflared",
    "tailscale", "wg", "openvpn", "nmcli", "iwconfig", "ethtool", "aria2c", "grpcurl",
    "websocat",
];

const OTHER: &[&str] = &[
    "ffmpeg", "ffprobe", "convert", "magick", "identify", "exiftool", "pandoc", "gs", "pdftotext",
    "qpdf", "imagemagick", "sox", "youtube-dl", "yt-dlp", "gpg", "age", "pass", "op", "bw",
    "tldr", "man", "neofetch", "fastfetch", "cowsay", "figlet",
];

/// Candidate binaries for `category`.
pub fn binaries(category: ToolCategory) -> &'static [&'static str] {
    match category {
        ToolCategory::PackageManagers => PACKAGE_MANAGERS,
        ToolCategory::Languages => LANGUAGES,
        ToolCategory::DevelopmentTools => DEVELOPMENT_TOOLS,
        ToolCategory::SystemCommands => SYSTEM_COMMANDS,
        ToolCategory::ContainerTools => CONTAINER_TOOLS,
        ToolCategory::CloudTools => CLOUD_TOOLS,
        ToolCategory::DatabaseTools => DATABASE_TOOLS,
        ToolCategory::NetworkTools => NETWORK_TOOLS,
        ToolCategory::Other => OTHER,
    }
}

/// Language runtimes whose version is worth a subprocess.
pub const RUNTIMES: &[RuntimeProbe] = &[
    RuntimeProbe { binary: "python3", version_args: &["--version"] },
    RuntimeProbe { binary: "python", version_args: &["--version"] },
    RuntimeProbe { binary: "node", version_args: &["--version"] },
    RuntimeProbe { binary: "deno", version_args: &["--version"] },
    RuntimeProbe { binary: "bun", version_args: &["--version"] },
    RuntimeProbe { binary: "ruby", version_args: &["--version"] },
    RuntimeProbe { binary: "perl", version_args: &["-e", "print $^V"] },
    RuntimeProbe { binary: "php", version_args: &["--version"] },
    RuntimeProbe { binary: "java", version_args: &["-version"] },
    RuntimeProbe { binary: "go", version_args: &["version"] },
    RuntimeProbe { binary: "rustc", version_args: &["--version"] },
    RuntimeProbe { binary: "gcc", version_args: &["--version"] },
    RuntimeProbe { binary: "clang", version_args: &["--version"] },
    RuntimeProbe { binary: "swift", version_args: &["--version"] },
    RuntimeProbe { binary: "dotnet", version_args: &["--version"] },
    RuntimeProbe { binary: "ghc", version_args: &["--version"] },
    RuntimeProbe { binary: "elixir", version_args: &["--version"] },
    RuntimeProbe { binary: "lua", version_args: &["-v"] },
    RuntimeProbe { binary: "julia", version_args: &["--version"] },
    RuntimeProbe { binary: "dart", version_args: &["--version"] },
    RuntimeProbe { binary: "zig", version_args: &["version"] },
    RuntimeProbe { binary: "kotlin", version_args: &["-version"] },
    RuntimeProbe { binary: "scala", version_args: &["-version"] },
    RuntimeProbe { binary: "Rscript", version_args: &["--version"] },
];

/// Development tools that get a version probe and a description.
pub const DEV_TOOLS: &[DevToolProbe] = &[
    DevToolProbe { binary: "git", description: "distributed version control" },
    DevToolProbe { binary: "gh", description: "GitHub command-line client" },
    DevToolProbe { binary: "make", description: "build automation from Makefiles" },
    DevToolProbe { binary: "cmake", description: "cross-platform build generator" },
    DevToolProbe { binary: "docker", description: "container runtime and image builder" },
    DevToolProbe { binary: "kubectl", description: "Kubernetes cluster control" },
    DevToolProbe { binary: "terraform", description: "infrastructure as code" },
    DevToolProbe { binary: "rg", description: "fast recursive text search (ripgrep)" },
    DevToolProbe { binary: "fd", description: "fast file finder" },
    DevToolProbe { binary: "fzf", description: "interactive fuzzy finder" },
    DevToolProbe { binary: "jq", description: "JSON processor" },
    DevToolProbe { binary: "yq", description: "YAML processor" },
    DevToolProbe { binary: "just", description: "command runner from justfiles" },
    DevToolProbe { binary: "shellcheck", description: "shell script linter" },
];

/// Total number of catalogue entries across all categories.
pub fn size() -> usize {
    ToolCategory::ALL.iter().map(|c| binaries(*c).len()).sum()
}
