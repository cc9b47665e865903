//! 任务存储 - 业务能力层
//!
//! 编排层把存储当作"至少一次、幂等"的写入目标：
//! 同一个任务 ID 重复 upsert 不会产生重复记录。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisJob, JobId};

/// 任务存储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 按任务 ID 插入或覆盖
    async fn upsert_job(&self, job: &AnalysisJob) -> AppResult<()>;

    /// 读取任务，不存在时返回 `None`
    async fn get_job(&self, id: &JobId) -> AppResult<Option<AnalysisJob>>;
}

/// 内存存储
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, AnalysisJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert_job(&self, job: &AnalysisJob) -> AppResult<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> AppResult<Option<AnalysisJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }
}

/// 文件存储：每个任务一个 JSON 文件
///
/// 写入先落到临时文件再 rename，重试写入只会覆盖同一个文件。
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// 打开目录，不存在时创建
    pub async fn open(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Persistence(format!("无法创建存储目录 {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &JobId) -> AppResult<PathBuf> {
        let name = id.as_str();
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(AppError::Validation(format!("非法任务 ID: {}", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn upsert_job(&self, job: &AnalysisJob) -> AppResult<()> {
        let path = self.path_for(&job.id)?;
        // 每次写入独立的临时文件，超时后仍在进行的旧写入不会和重试互相覆盖
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(job)
            .map_err(|e| AppError::Persistence(format!("序列化任务失败: {}", e)))?;

        let written = match fs::write(&tmp, body).await {
            Ok(()) => fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("任务已写入 {}", path.display());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> AppResult<Option<AnalysisJob>> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                let job = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::Persistence(format!("任务文件损坏 {}: {}", path.display(), e))
                })?;
                Ok(Some(job))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 根据 `DATABASE_URL` 打开存储
///
/// - `memory://` → [`MemoryJobStore`]
/// - `file://<目录>` → [`FileJobStore`]
pub async fn open_store(database_url: &str) -> AppResult<Arc<dyn JobStore>> {
    if database_url == "memory://" || database_url == "memory:" {
        return Ok(Arc::new(MemoryJobStore::new()));
    }
    if let Some(dir) = database_url.strip_prefix("file://") {
        if dir.is_empty() {
            return Err(AppError::Configuration("file:// 存储缺少目录".into()));
        }
        return Ok(Arc::new(FileJobStore::open(dir).await?));
    }
    Err(AppError::Configuration(format!(
        "不支持的 DATABASE_URL: {}（支持 memory:// 与 file://）",
        database_url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisType, Category, CategoryResult, JobStatus};

    fn terminal_job() -> AnalysisJob {
        let mut job = AnalysisJob::new(
            "https://example.com",
            AnalysisType::ContentAnalysis,
            vec![Category::Content, Category::Meta],
            None,
        );
        job.transition(JobStatus::Running).unwrap();
        job.categories = vec![
            CategoryResult::scored(Category::Content, None, 70.0, 100.0, vec![]),
            CategoryResult::failed(Category::Meta, None, "重试耗尽"),
        ];
        job.overall_score = Some(70.0);
        job.transition(JobStatus::PartialFailure).unwrap();
        job
    }

    #[tokio::test]
    async fn test_memory_upsert_is_idempotent() {
        let store = MemoryJobStore::new();
        let job = terminal_job();
        store.upsert_job(&job).await.unwrap();
        store.upsert_job(&job).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get_job(&job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_file_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let job = terminal_job();

        store.upsert_job(&job).await.unwrap();
        store.upsert_job(&job).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(store.get_job(&job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_file_concurrent_writes_use_separate_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileJobStore::open(dir.path()).await.unwrap());
        let job = terminal_job();

        let writes: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let job = job.clone();
                tokio::spawn(async move { store.upsert_job(&job).await })
            })
            .collect();
        for write in writes {
            write.await.unwrap().unwrap();
        }

        // 只剩最终文件，没有残留的临时文件
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", job.id)]);
        assert_eq!(store.get_job(&job.id).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_file_missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get_job(&JobId::from("missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        let err = store.get_job(&JobId::from("../etc/passwd")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_open_store_schemes() {
        assert!(open_store("memory://").await.is_ok());
        let err = open_store("postgres://localhost/seo").await.err().unwrap();
        assert!(matches!(err, AppError::Configuration(_)));

        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert!(open_store(&url).await.is_ok());
    }
}
