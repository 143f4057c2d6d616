use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{LabError, Result};
use crate::ipam::{probe, AddressPlanner, AddressPool, InUse};
use crate::models::*;
use crate::render::{render_lab, ArtifactSet, LabEnv, ENV_FILE};
use crate::runtime::{ComposeTarget, OrchestrationRuntime};
use crate::topology::TopologyBuilder;

/// Parameters for one `generate` call
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub spec: LabSpec,
    pub force: bool,
    pub mgmt_subnet: Option<Ipv4Cidr>,
}

/// Result of a successful generation
#[derive(Debug, Clone)]
pub struct GeneratedLab {
    pub path: PathBuf,
    pub topology: Topology,
    pub plan: AddressPlan,
    pub artifacts: ArtifactSet,
}

/// Drives the lab lifecycle (generate, up, down, release, inventory)
/// against one labs directory and its shared address pool
pub struct LabManager<R: OrchestrationRuntime> {
    cfg: Config,
    runtime: R,
    pool: AddressPool,
    builder: TopologyBuilder,
    planner: AddressPlanner,
}

impl<R: OrchestrationRuntime> LabManager<R> {
    pub fn new(cfg: Config, runtime: R) -> Result<Self> {
        let planner = AddressPlanner::from_config(&cfg)?;
        let builder = TopologyBuilder::from_config(&cfg);
        let pool = AddressPool::new(cfg.pool_dir(), cfg.pool_lock_timeout());
        Ok(Self {
            cfg,
            runtime,
            pool,
            builder,
            planner,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Plan, render and publish a lab, then record its subnets in the pool.
    /// The pool lock is held from the ledger read to the ledger commit.
    pub async fn generate(&self, req: &GenerateRequest) -> Result<GeneratedLab> {
        let name = req.spec.name.as_str();
        if let Some(subnet) = req.mgmt_subnet {
            if subnet.prefix_len() > 30 {
                return Err(LabError::invalid_subnet(
                    subnet.to_string(),
                    "management subnet must be /30 or larger",
                ));
            }
        }
        self.planner.check_capacity(&req.spec, req.mgmt_subnet)?;
        let topology = self.builder.build(&req.spec)?;

        let lab_dir = self.cfg.lab_dir(name);
        self.check_absent(name, &lab_dir, req.force)?;

        let probed = probe::discover(&self.cfg, name).await;

        let guard = self.pool.lock().await?;
        self.check_absent(name, &lab_dir, req.force)?;

        let ledger = guard.allocations()?;
        let own: Vec<Ipv4Cidr> = ledger.iter().filter(|a| a.lab == name).map(|a| a.subnet).collect();
        let mut in_use: Vec<InUse> = ledger.iter().filter(|a| a.lab != name).map(InUse::from).collect();
        in_use.extend(probed.into_iter().filter(|p| !own.contains(&p.subnet)));

        let plan = self.planner.plan(&topology, &in_use, req.mgmt_subnet)?;
        let artifacts = render_lab(&topology, &plan, &self.cfg.frr_image)?;

        self.publish(name, &lab_dir, &artifacts)?;

        let now = Utc::now();
        let entries: Vec<Allocation> = plan
            .subnets()
            .map(|(network, subnet)| Allocation {
                lab: name.to_string(),
                network: network.to_string(),
                subnet,
                allocated_at: now,
            })
            .collect();
        if let Err(e) = guard.commit(name, &entries) {
            tracing::error!("Ledger commit failed for {}, removing {}", name, lab_dir.display());
            if let Err(rm) = fs::remove_dir_all(&lab_dir) {
                tracing::warn!("Failed to remove {}: {}", lab_dir.display(), rm);
            }
            return Err(e);
        }
        drop(guard);

        tracing::info!(
            "Generated lab {} at {} ({} spines, {} leaves, mgmt {})",
            name,
            lab_dir.display(),
            req.spec.spine_count,
            req.spec.leaf_count,
            plan.management().subnet
        );
        Ok(GeneratedLab {
            path: lab_dir,
            topology,
            plan,
            artifacts,
        })
    }

    pub async fn up(&self, lab: &str) -> Result<()> {
        let target = self.target(lab)?;
        self.runtime.start(&target).await
    }

    /// Stop a lab. On success, optionally return its subnets to the pool and
    /// delete its directory. A failed stop leaves both untouched.
    pub async fn down(&self, lab: &str, release: bool, purge: bool) -> Result<Vec<Allocation>> {
        let target = self.target(lab)?;
        self.runtime.stop(&target).await?;

        let mut released = Vec::new();
        if release {
            let guard = self.pool.lock().await?;
            released = guard.release(lab)?;
            tracing::info!("Released {} subnets of {}", released.len(), lab);
        }
        if purge {
            fs::remove_dir_all(self.cfg.lab_dir(lab))?;
            tracing::info!("Removed lab directory for {}", lab);
        }
        Ok(released)
    }

    /// Return a lab's subnets to the pool without touching the runtime
    pub async fn release(&self, lab: &str) -> Result<Vec<Allocation>> {
        let lab_dir = self.lab_dir(lab)?;
        let guard = self.pool.lock().await?;
        let released = guard.release(lab)?;
        if released.is_empty() && !lab_dir.exists() {
            return Err(LabError::LabNotFound {
                lab: lab.to_string(),
                path: lab_dir,
            });
        }
        tracing::info!("Released {} subnets of {}", released.len(), lab);
        Ok(released)
    }

    /// Published labs, sorted by name. Hidden staging directories are skipped.
    pub fn list(&self) -> Result<Vec<LabSummary>> {
        let entries = match fs::read_dir(&self.cfg.labs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut labs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            let env_path = entry.path().join(ENV_FILE);
            if !env_path.is_file() {
                continue;
            }
            match LabEnv::read(&env_path) {
                Ok(env) => labs.push(LabSummary {
                    name,
                    path: entry.path().display().to_string(),
                    spine_count: env.spine_count(),
                    leaf_count: env.leaf_count(),
                    mgmt_subnet: env.mgmt_subnet().to_string(),
                }),
                Err(e) => tracing::warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
        labs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(labs)
    }

    pub async fn allocations(&self) -> Result<Vec<Allocation>> {
        let guard = self.pool.lock().await?;
        guard.allocations()
    }

    fn check_absent(&self, lab: &str, lab_dir: &Path, force: bool) -> Result<()> {
        if lab_dir.exists() && !force {
            return Err(LabError::LabAlreadyExists {
                lab: lab.to_string(),
                path: lab_dir.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Write artifacts to a hidden staging directory and rename it into place
    fn publish(&self, lab: &str, lab_dir: &Path, artifacts: &ArtifactSet) -> Result<()> {
        fs::create_dir_all(&self.cfg.labs_dir)?;
        let staging = self
            .cfg
            .labs_dir
            .join(format!(".staging-{}-{}", lab, Uuid::new_v4()));

        if let Err(e) = artifacts.write_to(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let trash = if lab_dir.exists() {
            let trash = self.cfg.labs_dir.join(format!(".trash-{}-{}", lab, Uuid::new_v4()));
            if let Err(e) = fs::rename(lab_dir, &trash) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e.into());
            }
            Some(trash)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staging, lab_dir) {
            let _ = fs::remove_dir_all(&staging);
            if let Some(trash) = &trash {
                let _ = fs::rename(trash, lab_dir);
            }
            return Err(e.into());
        }

        if let Some(trash) = trash {
            if let Err(e) = fs::remove_dir_all(&trash) {
                tracing::warn!("Failed to remove {}: {}", trash.display(), e);
            }
        }
        tracing::debug!("Published {} files to {}", artifacts.len(), lab_dir.display());
        Ok(())
    }

    /// Lab directory for a user-supplied name; rejects names that could escape `labs_dir`
    fn lab_dir(&self, lab: &str) -> Result<PathBuf> {
        if !crate::utils::is_valid_lab_name(lab) {
            return Err(LabError::InvalidLabName(lab.to_string()));
        }
        Ok(self.cfg.lab_dir(lab))
    }

    fn target(&self, lab: &str) -> Result<ComposeTarget> {
        let lab_dir = self.lab_dir(lab)?;
        let env_path = lab_dir.join(ENV_FILE);
        if !env_path.is_file() {
            return Err(LabError::LabNotFound {
                lab: lab.to_string(),
                path: lab_dir,
            });
        }
        let env = LabEnv::read(&env_path)?;
        let dir = fs::canonicalize(&lab_dir)?;
        Ok(ComposeTarget {
            lab: lab.to_string(),
            project_name: env.project_name()?.to_string(),
            compose_file: dir.join(env.compose_file()),
            env_file: dir.join(ENV_FILE),
            dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct FakeRuntime {
        calls: Mutex<Vec<(String, &'static str)>>,
        fail: bool,
    }

    impl FakeRuntime {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn record(&self, target: &ComposeTarget, action: &'static str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((target.project_name.clone(), action));
            if self.fail {
                return Err(LabError::runtime_unavailable(&target.lab, "exit status: 1: daemon not running"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OrchestrationRuntime for FakeRuntime {
        async fn start(&self, target: &ComposeTarget) -> Result<()> {
            self.record(target, "start")
        }

        async fn stop(&self, target: &ComposeTarget) -> Result<()> {
            self.record(target, "stop")
        }
    }

    fn test_config(dir: &Path) -> Config {
        Config {
            labs_dir: dir.to_path_buf(),
            scan_docker_networks: false,
            scan_host_interfaces: false,
            pool_lock_timeout_secs: 5,
            ..Config::default()
        }
    }

    fn manager(dir: &Path) -> LabManager<FakeRuntime> {
        LabManager::new(test_config(dir), FakeRuntime::default()).unwrap()
    }

    fn request(name: &str, spines: u32, leaves: u32) -> GenerateRequest {
        GenerateRequest {
            spec: LabSpec::new(name, spines, leaves).unwrap(),
            force: false,
            mgmt_subnet: None,
        }
    }

    fn hidden_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(".staging-") || n.starts_with(".trash-"))
            .collect();
        names.sort();
        names
    }

    fn subnets(lab: &GeneratedLab) -> Vec<Ipv4Cidr> {
        lab.plan.subnets().map(|(_, s)| s).collect()
    }

    fn read_tree(root: &Path, rel: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
        let mut entries: Vec<_> = fs::read_dir(root.join(rel)).unwrap().map(|e| e.unwrap()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let child = rel.join(entry.file_name());
            if entry.file_type().unwrap().is_dir() {
                read_tree(root, &child, out);
            } else {
                out.push((child, fs::read(entry.path()).unwrap()));
            }
        }
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut out = Vec::new();
        read_tree(dir, Path::new(""), &mut out);
        out
    }

    #[tokio::test]
    async fn test_generate_lab1() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let lab = assert_ok!(mgr.generate(&request("lab1", 1, 2)).await);

        assert_eq!(lab.path, dir.path().join("lab1"));
        for rel in [
            "docker-compose.yml",
            ".env",
            "frr/spine1/frr.conf",
            "frr/leaf1/daemons",
            "frr/leaf2/vtysh.conf",
        ] {
            assert!(lab.path.join(rel).is_file(), "missing {}", rel);
        }

        let ledger = mgr.allocations().await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger.iter().all(|a| a.lab == "lab1"));

        let spine = fs::read_to_string(lab.path.join("frr/spine1/frr.conf")).unwrap();
        assert!(spine.contains("router bgp 65001"));
        assert!(spine.contains("remote-as 65101"));
        assert!(spine.contains("remote-as 65102"));
    }

    #[tokio::test]
    async fn test_existing_lab_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab1", 1, 2)).await.unwrap();

        let err = assert_err!(mgr.generate(&request("lab1", 1, 2)).await);
        assert!(matches!(err, LabError::LabAlreadyExists { .. }));
        assert_eq!(err.exit_code(), 13);
    }

    #[tokio::test]
    async fn test_regenerate_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab1", 2, 3)).await.unwrap();
        let before = snapshot(&dir.path().join("lab1"));

        let mut req = request("lab1", 2, 3);
        req.force = true;
        mgr.generate(&req).await.unwrap();
        let after = snapshot(&dir.path().join("lab1"));

        assert_eq!(before, after);
        assert_eq!(mgr.allocations().await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_zero_spines_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let err = assert_err!(mgr.generate(&request("lab1", 0, 2)).await);
        assert!(matches!(err, LabError::InvalidTopologyShape { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_lab_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let err = assert_err!(mgr.generate(&request("lab1", 1, 3_000_000_000)).await);
        assert!(matches!(err, LabError::InvalidTopologyShape { .. }));
        assert_eq!(err.exit_code(), 10);

        // a /24 holds .11-.254, one node too many
        let err = assert_err!(mgr.generate(&request("lab1", 5, 240)).await);
        assert!(matches!(err, LabError::InvalidTopologyShape { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_leftover_staging_dir_is_not_a_lab() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        // a complete tree left behind by an interrupted generation
        mgr.generate(&request("lab0", 1, 1)).await.unwrap();
        fs::rename(dir.path().join("lab0"), dir.path().join(".staging-lab1-interrupted")).unwrap();

        assert!(mgr.list().unwrap().is_empty());
        assert_ok!(mgr.generate(&request("lab1", 1, 1)).await);
        let names: Vec<String> = mgr.list().unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["lab1"]);
    }

    #[test]
    fn test_failed_staging_write_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        // "frr" is written as a file, so "frr/spine1" cannot become a directory
        let mut artifacts = ArtifactSet::default();
        artifacts.insert("frr", "x");
        artifacts.insert("frr/spine1/frr.conf", "x");

        let lab_dir = dir.path().join("lab1");
        assert_err!(mgr.publish("lab1", &lab_dir, &artifacts));
        assert!(!lab_dir.exists());
        assert!(hidden_entries(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_labs_dir_leaves_no_staging_or_ledger_entries() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab0", 1, 1)).await.unwrap();

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();
        let writable = fs::write(dir.path().join("canary"), "").is_ok();
        let result = mgr.generate(&request("lab1", 1, 1)).await;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        if writable {
            // permission bits are not enforced for this user
            return;
        }

        assert_err!(result);
        assert!(!dir.path().join("lab1").exists());
        assert!(hidden_entries(dir.path()).is_empty());
        let ledger = mgr.allocations().await.unwrap();
        assert!(ledger.iter().all(|a| a.lab == "lab0"));
    }

    #[tokio::test]
    async fn test_failed_commit_removes_published_lab() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab1", 1, 2)).await.unwrap();

        // lab1 already has entries, so the commit rewrites through the tmp file
        fs::create_dir(dir.path().join(".ipam").join("ledger.jsonl.tmp")).unwrap();
        let mut req = request("lab1", 1, 2);
        req.force = true;
        let err = assert_err!(mgr.generate(&req).await);
        assert!(matches!(err, LabError::Io(_)));

        assert!(!dir.path().join("lab1").exists());
        assert!(hidden_entries(dir.path()).is_empty());
        assert!(mgr.list().unwrap().is_empty());
        assert_eq!(mgr.allocations().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_two_labs_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let a = mgr.generate(&request("lab1", 1, 2)).await.unwrap();
        let b = mgr.generate(&request("lab2", 1, 2)).await.unwrap();

        for x in subnets(&a) {
            for y in subnets(&b) {
                assert!(!x.overlaps(&y), "{} overlaps {}", x, y);
            }
        }
        let names: Vec<String> = mgr.list().unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["lab1", "lab2"]);
    }

    #[tokio::test]
    async fn test_down_releases_and_space_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let first = mgr.generate(&request("lab1", 1, 2)).await.unwrap();

        let released = mgr.down("lab1", true, true).await.unwrap();
        assert_eq!(released.len(), 3);
        assert!(!dir.path().join("lab1").exists());
        assert!(mgr.allocations().await.unwrap().is_empty());

        let second = mgr.generate(&request("lab3", 1, 2)).await.unwrap();
        assert_eq!(subnets(&first), subnets(&second));
    }

    #[tokio::test]
    async fn test_up_and_down_use_project_name() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab1", 1, 1)).await.unwrap();

        mgr.up("lab1").await.unwrap();
        mgr.down("lab1", false, false).await.unwrap();
        let calls = mgr.runtime.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("lab1".to_string(), "start"), ("lab1".to_string(), "stop")]
        );
        // keep-addresses leaves the ledger alone
        assert_eq!(mgr.allocations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_lab() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let err = assert_err!(mgr.up("ghost").await);
        assert!(matches!(err, LabError::LabNotFound { .. }));
        let err = assert_err!(mgr.release("ghost").await);
        assert!(matches!(err, LabError::LabNotFound { .. }));
        let err = assert_err!(mgr.up("../etc").await);
        assert!(matches!(err, LabError::InvalidLabName(_)));
    }

    #[tokio::test]
    async fn test_failed_down_keeps_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LabManager::new(test_config(dir.path()), FakeRuntime::failing()).unwrap();
        mgr.generate(&request("lab1", 1, 2)).await.unwrap();

        let err = assert_err!(mgr.down("lab1", true, true).await);
        assert!(matches!(err, LabError::RuntimeUnavailable { .. }));
        assert_eq!(err.exit_code(), 15);
        assert_eq!(mgr.allocations().await.unwrap().len(), 3);
        assert!(dir.path().join("lab1").exists());
    }

    #[tokio::test]
    async fn test_manual_release() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.generate(&request("lab1", 1, 2)).await.unwrap();
        mgr.generate(&request("lab2", 1, 2)).await.unwrap();

        assert_eq!(mgr.release("lab1").await.unwrap().len(), 3);
        let left: Vec<String> = mgr.allocations().await.unwrap().into_iter().map(|a| a.lab).collect();
        assert!(left.iter().all(|l| l == "lab2"));
        // directory is kept, a second release is a no-op
        assert!(mgr.release("lab1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mgmt_subnet_override() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let lab1 = mgr.generate(&request("lab1", 1, 1)).await.unwrap();

        let mut req = request("lab2", 1, 1);
        req.mgmt_subnet = Some(lab1.plan.management().subnet);
        let err = assert_err!(mgr.generate(&req).await);
        assert!(matches!(err, LabError::SubnetInUse { .. }));
        assert!(!dir.path().join("lab2").exists());

        req.mgmt_subnet = Some("192.168.77.0/24".parse().unwrap());
        let lab2 = mgr.generate(&req).await.unwrap();
        assert_eq!(lab2.plan.management().subnet.to_string(), "192.168.77.0/24");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_generate_is_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path()));

        let mut handles = Vec::new();
        for i in 0..6 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.generate(&request(&format!("lab{}", i), 2, 2)).await
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            let lab = handle.await.unwrap().unwrap();
            all.extend(subnets(&lab));
        }

        assert_eq!(all.len(), 6 * 5);
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
        assert_eq!(mgr.allocations().await.unwrap().len(), 30);
        assert!(fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .all(|n| !n.starts_with(".staging-")));
    }
}
