use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};

use crate::blobs::BlobStore;
use crate::db::{self, UserId};
use crate::errors::{self, FileStoreError};
use crate::jobs::{JobDispatcher, ThumbnailJob};
use crate::schema::file;

pub type FileId = i32;

pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Folder,
    File,
    Image,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Folder => "folder",
            FileKind::File => "file",
            FileKind::Image => "image",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = FileStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "folder" => Ok(FileKind::Folder),
            "file" => Ok(FileKind::File),
            "image" => Ok(FileKind::Image),
            _ => Err(FileStoreError::validation("Missing type")),
        }
    }
}

/// Where a file sits. Root is its own variant rather than a magic id, the
/// `0` only exists on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Root,
    Folder(FileId),
}

impl Parent {
    fn from_column(parent_id: Option<FileId>) -> Self {
        match parent_id {
            None => Parent::Root,
            Some(id) => Parent::Folder(id),
        }
    }

    fn as_column(&self) -> Option<FileId> {
        match self {
            Parent::Root => None,
            Parent::Folder(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: FileId,
    pub user_id: UserId,
    pub name: String,
    pub kind: FileKind,
    pub is_public: bool,
    pub parent: Parent,
    /// Blob store reference, always set for files and images, never for folders.
    pub local_path: Option<String>,
}

#[derive(Debug, Queryable)]
struct FileRow {
    id: FileId,
    user_id: UserId,
    name: String,
    kind: String,
    is_public: bool,
    parent_id: Option<FileId>,
    local_path: Option<String>,
}

type FileColumns = (
    file::id,
    file::user_id,
    file::name,
    file::kind,
    file::is_public,
    file::parent_id,
    file::local_path,
);

/// What `FileRow` is loaded from, `created_at` is only kept for bookkeeping.
const FILE_COLUMNS: FileColumns = (
    file::id,
    file::user_id,
    file::name,
    file::kind,
    file::is_public,
    file::parent_id,
    file::local_path,
);

impl TryFrom<FileRow> for File {
    type Error = FileStoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let kind: FileKind = row
            .kind
            .parse()
            .map_err(|_| anyhow!("file {} has an unknown kind {:?}", row.id, row.kind))?;
        Ok(File {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            kind,
            is_public: row.is_public,
            parent: Parent::from_column(row.parent_id),
            local_path: row.local_path,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = file)]
struct InsertFile<'a> {
    user_id: UserId,
    name: &'a str,
    kind: &'a str,
    is_public: bool,
    parent_id: Option<FileId>,
    local_path: Option<&'a str>,
    created_at: NaiveDateTime,
}

/// Everything an upload carries, still unvalidated.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    pub kind: String,
    pub is_public: bool,
    pub parent: Parent,
    pub data: Option<Vec<u8>>,
}

/// Owns file metadata, delegates bytes to the blob store and image
/// post-processing to the job dispatcher.
#[derive(Clone)]
pub struct FileTree {
    blobs: Arc<dyn BlobStore>,
    jobs: Arc<dyn JobDispatcher>,
}

impl FileTree {
    pub fn new(blobs: Arc<dyn BlobStore>, jobs: Arc<dyn JobDispatcher>) -> Self {
        Self { blobs, jobs }
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn create(
        &self,
        conn: &mut SqliteConnection,
        owner: UserId,
        new_file: NewFile,
    ) -> errors::Result<File> {
        if new_file.name.is_empty() {
            return Err(FileStoreError::validation("Missing name"));
        }
        let kind: FileKind = new_file.kind.parse()?;
        let data = match (kind, new_file.data) {
            (FileKind::Folder, _) => None,
            (_, Some(data)) => Some(data),
            (_, None) => return Err(FileStoreError::validation("Missing data")),
        };

        if let Parent::Folder(parent_id) = new_file.parent {
            match self.find_owned(conn, owner, parent_id)? {
                None => return Err(FileStoreError::not_found("Parent not found")),
                Some(parent) if parent.kind != FileKind::Folder => {
                    return Err(FileStoreError::validation("Parent is not a folder"))
                }
                Some(_) => (),
            }
        }

        // bytes first: a crash in between leaves an orphan blob, never a
        // record pointing at nothing
        let local_path = match &data {
            Some(bytes) => Some(self.blobs.put(bytes)?),
            None => None,
        };

        diesel::insert_into(file::table)
            .values(&InsertFile {
                user_id: owner,
                name: &new_file.name,
                kind: kind.as_str(),
                is_public: new_file.is_public,
                parent_id: new_file.parent.as_column(),
                local_path: local_path.as_deref(),
                created_at: Utc::now().naive_utc(),
            })
            .execute(conn)?;
        let id = db::last_inserted_id(conn)?;

        let created = File {
            id,
            user_id: owner,
            name: new_file.name,
            kind,
            is_public: new_file.is_public,
            parent: new_file.parent,
            local_path,
        };
        log::info!("user {owner} created {kind} {id} ({:?})", created.name);

        if let (FileKind::Image, Some(local_path)) = (kind, &created.local_path) {
            let job = ThumbnailJob {
                user_id: owner,
                file_id: id,
                local_path: local_path.clone(),
            };
            if let Err(err) = self.jobs.enqueue(job) {
                log::error!("Could not enqueue thumbnail job for file {id}: {err:?}");
            }
        }

        Ok(created)
    }

    /// The file if it exists *and* belongs to `owner`. Both failures look the same.
    pub fn get_by_id(
        &self,
        conn: &mut SqliteConnection,
        owner: UserId,
        file_id: FileId,
    ) -> errors::Result<Option<File>> {
        self.find_owned(conn, owner, file_id)
    }

    /// One page of `owner`'s files directly under `parent`, in insertion order.
    pub fn list(
        &self,
        conn: &mut SqliteConnection,
        owner: UserId,
        parent: Parent,
        page: u32,
    ) -> errors::Result<Vec<File>> {
        let query: file::BoxedQuery<'_, Sqlite> = file::table
            .filter(file::user_id.eq(owner))
            .order(file::id.asc())
            .limit(PAGE_SIZE)
            .offset(i64::from(page) * PAGE_SIZE)
            .into_boxed();
        let query = match parent {
            Parent::Root => query.filter(file::parent_id.is_null()),
            Parent::Folder(parent_id) => query.filter(file::parent_id.eq(parent_id)),
        };
        query
            .select(FILE_COLUMNS)
            .load::<FileRow>(conn)?
            .into_iter()
            .map(File::try_from)
            .collect()
    }

    /// Bytes of a file, for its owner or for anyone when it's public.
    pub fn read_content(
        &self,
        conn: &mut SqliteConnection,
        viewer: Option<UserId>,
        file_id: FileId,
    ) -> errors::Result<(File, Vec<u8>)> {
        let found = file::table
            .find(file_id)
            .select(FILE_COLUMNS)
            .first::<FileRow>(conn)
            .optional()?
            .map(File::try_from)
            .transpose()?;
        let found = match found {
            Some(f) if f.is_public || Some(f.user_id) == viewer => f,
            _ => return Err(FileStoreError::not_found("Not found")),
        };
        if found.kind == FileKind::Folder {
            return Err(FileStoreError::validation("A folder doesn't have content"));
        }
        let bytes = match &found.local_path {
            Some(path) => self.blobs.get(path)?,
            None => return Err(FileStoreError::not_found("Not found")),
        };
        Ok((found, bytes))
    }

    fn find_owned(
        &self,
        conn: &mut SqliteConnection,
        owner: UserId,
        file_id: FileId,
    ) -> errors::Result<Option<File>> {
        file::table
            .filter(file::id.eq(file_id))
            .filter(file::user_id.eq(owner))
            .select(FILE_COLUMNS)
            .first::<FileRow>(conn)
            .optional()?
            .map(File::try_from)
            .transpose()
    }
}
