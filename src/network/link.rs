//! Link manager: bounded association with the network
//!
//! `connect` asks the driver to begin association and then polls its status at
//! a fixed interval until the link is up or the timeout expires. A timeout is
//! not fatal: the caller keeps running in a "no link" state and decides when
//! to try again. There is no background retry.

use super::Credentials;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Link did not come up within {0:?}")]
    TimedOut(Duration),

    #[error("Link driver error: {0}")]
    Driver(String),
}

/// Platform access to the network link
pub trait LinkDriver: Send {
    fn is_up(&self) -> bool;

    /// Starts association; must not wait for it to complete
    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError>;

    fn describe(&self) -> String;
}

pub struct LinkManager {
    driver: Box<dyn LinkDriver>,
    poll_interval: Duration,
}

impl LinkManager {
    pub fn new(driver: Box<dyn LinkDriver>, poll_interval: Duration) -> Self {
        Self {
            driver,
            poll_interval,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_up()
    }

    pub fn describe(&self) -> String {
        self.driver.describe()
    }

    /// Associates and waits at most `timeout` for the link to come up.
    ///
    /// A driver error while starting association is logged; status polling
    /// continues regardless, since the link may come up on its own.
    pub async fn connect(
        &mut self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        info!(
            "Connecting link {} to '{}'",
            self.driver.describe(),
            credentials.ssid
        );

        if let Err(e) = self.driver.begin(credentials) {
            warn!("Could not start association: {}", e);
        }

        let start = Instant::now();
        while !self.driver.is_up() {
            if start.elapsed() >= timeout {
                warn!(
                    "Link connect timed out after {:?}, continuing without network",
                    timeout
                );
                return Err(LinkError::TimedOut(timeout));
            }
            sleep(self.poll_interval).await;
            debug!("Waiting for link ({:?} elapsed)", start.elapsed());
        }

        info!("Link up after {:?}", start.elapsed());
        Ok(())
    }
}

/// Linux network interface, status taken from sysfs `operstate`
///
/// With `join` enabled, association is started through NetworkManager's
/// `nmcli`; otherwise the interface is expected to be managed elsewhere and
/// the driver only observes it.
pub struct InterfaceLink {
    interface: String,
    sysfs_root: PathBuf,
    join: bool,
    join_process: Option<Child>,
}

impl InterfaceLink {
    pub fn new(interface: impl Into<String>, join: bool) -> Self {
        Self::with_sysfs_root(interface, join, "/sys")
    }

    pub fn with_sysfs_root(
        interface: impl Into<String>,
        join: bool,
        sysfs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            interface: interface.into(),
            sysfs_root: sysfs_root.into(),
            join,
            join_process: None,
        }
    }

    fn operstate_path(&self) -> PathBuf {
        self.sysfs_root
            .join("class/net")
            .join(&self.interface)
            .join("operstate")
    }
}

impl LinkDriver for InterfaceLink {
    fn is_up(&self) -> bool {
        match std::fs::read_to_string(self.operstate_path()) {
            Ok(state) => state.trim() == "up",
            Err(_) => false,
        }
    }

    fn begin(&mut self, credentials: &Credentials) -> Result<(), LinkError> {
        if !self.join || credentials.ssid.is_empty() {
            debug!("Passive link on {}, not starting association", self.interface);
            return Ok(());
        }

        if let Some(child) = self.join_process.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    debug!("Previous association attempt still running");
                    return Ok(());
                }
                Ok(Some(status)) => debug!("Previous association exited with {}", status),
                Err(e) => warn!("Could not query association process: {}", e),
            }
        }

        let child = Command::new("nmcli")
            .args(["device", "wifi", "connect", credentials.ssid.as_str()])
            .args(["password", credentials.password.as_str()])
            .args(["ifname", self.interface.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LinkError::Driver(format!("failed to run nmcli: {}", e)))?;

        self.join_process = Some(child);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("interface {}", self.interface)
    }
}

/// Host-managed networking; the link is always considered up
#[derive(Debug, Default)]
pub struct HostLink;

impl LinkDriver for HostLink {
    fn is_up(&self) -> bool {
        true
    }

    fn begin(&mut self, _credentials: &Credentials) -> Result<(), LinkError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "host network".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // Comes up once `is_up` has been queried `up_after` times
    struct SlowLink {
        polls: Arc<AtomicU32>,
        up_after: u32,
        begins: Arc<AtomicU32>,
    }

    impl LinkDriver for SlowLink {
        fn is_up(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst) >= self.up_after
        }

        fn begin(&mut self, _credentials: &Credentials) -> Result<(), LinkError> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Err(LinkError::Driver("radio busy".to_string()))
        }

        fn describe(&self) -> String {
            "slow".to_string()
        }
    }

    fn slow_link(up_after: u32) -> (LinkManager, Arc<AtomicU32>) {
        let begins = Arc::new(AtomicU32::new(0));
        let driver = SlowLink {
            polls: Arc::new(AtomicU32::new(0)),
            up_after,
            begins: begins.clone(),
        };
        (
            LinkManager::new(Box::new(driver), Duration::from_millis(500)),
            begins,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_polls_until_up() {
        let (mut link, begins) = slow_link(4);
        let start = Instant::now();

        let result = link
            .connect(&Credentials::default(), Duration::from_secs(20))
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(begins.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let (mut link, _) = slow_link(u32::MAX);
        let start = Instant::now();

        let result = link
            .connect(&Credentials::default(), Duration::from_secs(20))
            .await;

        assert_eq!(result, Err(LinkError::TimedOut(Duration::from_secs(20))));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn test_interface_link_reads_operstate() {
        let root = std::env::temp_dir().join(format!("sensorpub-sysfs-{}", std::process::id()));
        let iface_dir = root.join("class/net/wlan0");
        std::fs::create_dir_all(&iface_dir).unwrap();

        let link = InterfaceLink::with_sysfs_root("wlan0", false, &root);
        std::fs::write(iface_dir.join("operstate"), "down\n").unwrap();
        assert!(!link.is_up());
        std::fs::write(iface_dir.join("operstate"), "up\n").unwrap();
        assert!(link.is_up());

        let missing = InterfaceLink::with_sysfs_root("eth9", false, &root);
        assert!(!missing.is_up());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_passive_interface_does_not_join() {
        let mut link = InterfaceLink::new("wlan0", false);
        let creds = Credentials {
            ssid: "lab".to_string(),
            password: "pw".to_string(),
        };
        assert_eq!(link.begin(&creds), Ok(()));
        assert!(link.join_process.is_none());
    }

    #[test]
    fn test_host_link_is_always_up() {
        assert!(LinkManager::new(Box::new(HostLink), Duration::from_millis(500)).is_connected());
    }
}
