//! Location resolution: protocol dispatch, credentials, archive paths and caching

use crate::archive::BROWSE_ARCHIVES_PROPERTY;
use crate::encoding::ENCODING_PROPERTY;
use crate::location::LOCAL_SCHEME;
use crate::{
    wrap_if_archive, ArchiveFormat, CredentialStore, EncodingHint, FileHandle, FileUrl, FsError,
    LocalFile, Result, VfsConfig,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Backend for one location scheme
pub trait ProtocolProvider: Send + Sync {
    /// Handle for `url`; a missing file still yields a handle whose `exists()` is false
    ///
    /// Backends that need a login and got none fail with [`FsError::AuthRequired`].
    fn get_file(&self, url: &FileUrl) -> Result<FileHandle>;
}

/// Provider for `file://` locations
#[derive(Debug, Default)]
pub struct LocalProvider;

impl ProtocolProvider for LocalProvider {
    fn get_file(&self, url: &FileUrl) -> Result<FileHandle> {
        Ok(Arc::new(LocalFile::new(url.clone())?))
    }
}

/// Entry point turning location strings into file handles
///
/// Owns the provider registry, the credential store and a small LRU cache of
/// local handles. Create one per application and share it.
pub struct FileFactory {
    providers: RwLock<HashMap<String, Arc<dyn ProtocolProvider>>>,
    credentials: CredentialStore,
    cache: Mutex<HandleCache>,
    home: Option<String>,
    browse_archives: bool,
    encoding_hint: EncodingHint,
}

impl FileFactory {
    pub fn new(config: &VfsConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn ProtocolProvider>> = HashMap::new();
        providers.insert(LOCAL_SCHEME.to_string(), Arc::new(LocalProvider));

        Self {
            providers: RwLock::new(providers),
            credentials: CredentialStore::new(),
            cache: Mutex::new(HandleCache::new(config.cache.capacity)),
            home: config.paths.home.clone(),
            browse_archives: config.archives.enabled,
            encoding_hint: config.archives.encoding_hint,
        }
    }

    /// Register (or replace) the provider for `scheme`
    pub fn register_provider(&self, scheme: &str, provider: Arc<dyn ProtocolProvider>) {
        let scheme = scheme.to_ascii_lowercase();
        tracing::debug!("Registering provider for {}://", scheme);
        self.providers.write().insert(scheme, provider);
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Handle for a location string: a URL, a native path, a UNC path or `~/...`
    pub fn get_file(&self, location: &str) -> Result<FileHandle> {
        let url = match &self.home {
            Some(home) => FileUrl::parse_with_home(location, Some(home))?,
            None => FileUrl::parse(location)?,
        };
        self.get_file_url(&url)
    }

    pub fn get_file_url(&self, url: &FileUrl) -> Result<FileHandle> {
        let url = self.prepare(url);
        let cacheable = url.scheme() == LOCAL_SCHEME;

        if cacheable {
            if let Some(file) = self.cache.lock().get(url.id()) {
                tracing::debug!("Cache hit for {}", url);
                return Ok(file);
            }
        }

        let provider = self
            .providers
            .read()
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| FsError::Unsupported(format!("No provider for {}://", url.scheme())))?;

        tracing::debug!("Resolving {} with the {} provider", url, url.scheme());
        let file = self.resolve(provider.as_ref(), &url)?;

        // Missing files are not cached; creating them may change their kind
        if cacheable && file.exists() {
            self.cache.lock().insert(url.id(), Arc::clone(&file));
        }
        Ok(file)
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Credentials and archive settings attached to a location
    fn prepare(&self, url: &FileUrl) -> FileUrl {
        let mut url = url.clone();

        // Inline credentials win over stored ones
        if url.credentials().is_none() {
            if let Some(credentials) = self.credentials.lookup_url(&url) {
                url = url.with_credentials(Some(credentials));
            }
        }

        if !self.browse_archives {
            url = url.with_property(BROWSE_ARCHIVES_PROPERTY, "false");
        }
        if self.encoding_hint != EncodingHint::Auto {
            url = url.with_property(ENCODING_PROPERTY, self.encoding_hint.as_str());
        }
        url
    }

    /// Provider lookup, descending into archives named along the path when
    /// the location itself does not exist
    fn resolve(&self, provider: &dyn ProtocolProvider, url: &FileUrl) -> Result<FileHandle> {
        let file = provider.get_file(url)?;
        if file.exists() || !self.browse_archives {
            return Ok(wrap_if_archive(file));
        }

        let path = url.path();
        let mut from = 1;
        while let Some(pos) = path[from..].find('/') {
            let end = from + pos;
            let prefix = &path[..end];
            from = end + 1;

            let is_archive_name = prefix
                .rsplit('/')
                .next()
                .is_some_and(|name| ArchiveFormat::detect(name).is_some());
            if !is_archive_name {
                continue;
            }

            let container = provider.get_file(&url.with_path(prefix))?;
            if !container.exists() || container.is_directory() {
                continue;
            }

            let container = wrap_if_archive(container);
            if let Some(archive) = container.as_archive() {
                tracing::debug!("Resolving {} inside {}", &path[end..], container.url());
                return archive.resolve_entry(&path[end + 1..]);
            }
        }

        Ok(wrap_if_archive(file))
    }
}

impl std::fmt::Debug for FileFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<String> = self.providers.read().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("FileFactory")
            .field("schemes", &schemes)
            .field("cached", &self.cache.lock().len())
            .field("browse_archives", &self.browse_archives)
            .finish()
    }
}

/// Local handles keyed by `FileUrl::id()`, least recently used evicted first
struct HandleCache {
    capacity: usize,
    entries: HashMap<u64, CachedHandle>,
    clock: u64,
}

struct CachedHandle {
    file: FileHandle,
    last_used: u64,
}

impl HandleCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    /// Cached handle for `id`, unless the file behind it changed kind
    fn get(&mut self, id: u64) -> Option<FileHandle> {
        let cached = self.entries.get_mut(&id)?;
        if is_stale(&cached.file) {
            self.entries.remove(&id);
            return None;
        }

        self.clock += 1;
        cached.last_used = self.clock;
        Some(Arc::clone(&cached.file))
    }

    fn insert(&mut self, id: u64, file: FileHandle) {
        if self.capacity == 0 {
            return;
        }
        self.clock += 1;

        if !self.entries.contains_key(&id) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, cached)| cached.last_used)
                .map(|(&id, _)| id);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(
            id,
            CachedHandle {
                file,
                last_used: self.clock,
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Gone, or an archive adapter whose container has become a directory
fn is_stale(file: &FileHandle) -> bool {
    !file.exists()
        || file
            .as_archive()
            .is_some_and(|archive| archive.inner().is_directory())
}
