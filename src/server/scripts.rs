//! Shell scripts shipped to the host and into the app container.

/// Token replaced with the container-internal port before the app script is
/// sent.
pub const CONTAINER_PORT_PLACEHOLDER: &str = "__CONTAINER_PORT__";

pub const APP_DIR: &str = "/app";
pub const APP_LOG_PATH: &str = "/app/dev.log";
pub const TUNNEL_LOG_PATH: &str = "/app/cloudflared.log";

/// Installs Docker engine, CLI, containerd and the buildx/compose plugins
/// from Docker's apt repository. Safe to re-run: apt treats installed
/// packages as a no-op.
pub const DOCKER_INSTALL_SCRIPT: &str = r#"
set -e
export DEBIAN_FRONTEND=noninteractive

echo "--- Installing Docker prerequisites ---"
apt-get update -y
apt-get install -y ca-certificates curl

install -m 0755 -d /etc/apt/keyrings
curl -fsSL https://download.docker.com/linux/ubuntu/gpg -o /etc/apt/keyrings/docker.asc
chmod a+r /etc/apt/keyrings/docker.asc

echo "deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/ubuntu $(. /etc/os-release && echo "$VERSION_CODENAME") stable" \
  > /etc/apt/sources.list.d/docker.list

echo "--- Installing Docker engine and compose plugin ---"
apt-get update -y
apt-get install -y docker-ce docker-ce-cli containerd.io docker-buildx-plugin docker-compose-plugin

echo "--- Docker installation finished ---"
"#;

/// Runs inside the app container: tooling, cloudflared, a Next.js
/// hello-world app in /app, then `npm run dev` in the background.
pub const APP_INSTALL_SCRIPT_TEMPLATE: &str = r#"
set -ex
export DEBIAN_FRONTEND=noninteractive

apt-get update -y || { echo "ERROR: apt-get update failed"; exit 1; }
apt-get install -y sudo || { echo "ERROR: sudo installation failed"; exit 1; }
sudo apt-get install -y curl gnupg lsb-release apt-utils git || { echo "ERROR: core dependencies installation failed"; exit 1; }

echo "Node.js $(node -v), npm $(npm -v)"

echo "--- Installing cloudflared ---"
sudo mkdir -p --mode=0755 /usr/share/keyrings
curl -fsSL https://pkg.cloudflare.com/cloudflare-main.gpg | sudo tee /usr/share/keyrings/cloudflare-main.gpg >/dev/null || { echo "ERROR: cloudflare gpg key download failed"; exit 1; }
chmod a+r /usr/share/keyrings/cloudflare-main.gpg
echo 'deb [signed-by=/usr/share/keyrings/cloudflare-main.gpg] https://pkg.cloudflare.com/cloudflared any main' | sudo tee /etc/apt/sources.list.d/cloudflared.list >/dev/null
sudo apt-get update -y && sudo apt-get install -y cloudflared || { echo "ERROR: cloudflared installation failed"; exit 1; }
cloudflared --version || { echo "ERROR: cloudflared not runnable"; exit 1; }

echo "--- Scaffolding application in /app ---"
cd /
npx --yes create-next-app@latest app --use-npm --example "https://github.com/vercel/next.js/tree/canary/examples/hello-world" || { echo "ERROR: create-next-app failed"; exit 1; }
cd /app
npm install || { echo "ERROR: npm install failed"; exit 1; }

echo "--- Starting dev server ---"
nohup npm run dev -- --hostname 0.0.0.0 -p __CONTAINER_PORT__ > /app/dev.log 2>&1 &
echo "--- Application started, logs in /app/dev.log ---"
"#;

pub fn render_app_install_script(container_port: u16) -> String {
    APP_INSTALL_SCRIPT_TEMPLATE.replace(CONTAINER_PORT_PLACEHOLDER, &container_port.to_string())
}
