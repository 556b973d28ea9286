//! Single place where a caller's identity is established.
//!
//! Every file operation takes the raw token presented by the caller, resolves
//! it through the session store and only then reaches the file tree with the
//! resolved user as owner. Nothing downstream accepts a user id from outside.

use diesel::sqlite::SqliteConnection;

use crate::db::{self, User, UserId};
use crate::errors::{self, FileStoreError};
use crate::files::{File, FileId, FileTree, NewFile, Parent};
use crate::sessions::{self, Token};

#[derive(Clone)]
pub struct AccessGateway {
    tree: FileTree,
}

impl AccessGateway {
    pub fn new(tree: FileTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    /// Missing, unknown, expired and revoked tokens are all the same to callers.
    pub fn authenticate(
        &self,
        conn: &mut SqliteConnection,
        token: Option<&str>,
    ) -> errors::Result<UserId> {
        let token = token.ok_or(FileStoreError::Unauthorized)?;
        sessions::resolve(conn, token)?.ok_or(FileStoreError::Unauthorized)
    }

    pub fn connect(
        &self,
        conn: &mut SqliteConnection,
        email: &str,
        password: &str,
    ) -> errors::Result<Token> {
        if email.is_empty() || password.is_empty() {
            return Err(FileStoreError::Unauthorized);
        }
        match db::verify_credentials(conn, email, password)? {
            Some(user_id) => sessions::issue(conn, user_id),
            None => {
                log::debug!("auth is invalid for {email}");
                Err(FileStoreError::Unauthorized)
            }
        }
    }

    pub fn disconnect(&self, conn: &mut SqliteConnection, token: Option<&str>) -> errors::Result<()> {
        let token = token.ok_or(FileStoreError::Unauthorized)?;
        if sessions::revoke(conn, token)? {
            Ok(())
        } else {
            Err(FileStoreError::Unauthorized)
        }
    }

    pub fn me(&self, conn: &mut SqliteConnection, token: Option<&str>) -> errors::Result<User> {
        let user_id = self.authenticate(conn, token)?;
        // a live session for a user that vanished behaves like no session
        db::get_user(conn, user_id)?.ok_or(FileStoreError::Unauthorized)
    }

    pub fn upload(
        &self,
        conn: &mut SqliteConnection,
        token: Option<&str>,
        new_file: NewFile,
    ) -> errors::Result<File> {
        let owner = self.authenticate(conn, token)?;
        self.tree.create(conn, owner, new_file)
    }

    pub fn show(
        &self,
        conn: &mut SqliteConnection,
        token: Option<&str>,
        file_id: FileId,
    ) -> errors::Result<File> {
        let owner = self.authenticate(conn, token)?;
        self.tree
            .get_by_id(conn, owner, file_id)?
            .ok_or_else(|| FileStoreError::not_found("Not found"))
    }

    pub fn index(
        &self,
        conn: &mut SqliteConnection,
        token: Option<&str>,
        parent: Parent,
        page: u32,
    ) -> errors::Result<Vec<File>> {
        let owner = self.authenticate(conn, token)?;
        self.tree.list(conn, owner, parent, page)
    }

    /// Public content doesn't need a session, so a bad token only downgrades
    /// the caller to anonymous instead of failing.
    pub fn content(
        &self,
        conn: &mut SqliteConnection,
        token: Option<&str>,
        file_id: FileId,
    ) -> errors::Result<(File, Vec<u8>)> {
        let viewer = match token {
            Some(token) => sessions::resolve(conn, token)?,
            None => None,
        };
        self.tree.read_content(conn, viewer, file_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::blobs::DiskBlobStore;
    use crate::db::test_utils;
    use crate::jobs::test_utils::RecordingDispatcher;

    struct Fixture {
        conn: SqliteConnection,
        gateway: AccessGateway,
        jobs: Arc<RecordingDispatcher>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(RecordingDispatcher::default());
        let tree = FileTree::new(Arc::new(DiskBlobStore::new(dir.path()).unwrap()), jobs.clone());
        let mut conn = test_utils::conn();
        db::gen_user(&mut conn, "bob@dylan.com", "toto1234!").unwrap();
        Fixture {
            conn,
            gateway: AccessGateway::new(tree),
            jobs,
            _dir: dir,
        }
    }

    fn image() -> NewFile {
        NewFile {
            name: "image.png".to_string(),
            kind: "image".to_string(),
            is_public: true,
            parent: Parent::Root,
            data: Some(b"\x89PNG".to_vec()),
        }
    }

    #[test]
    fn connect_then_use_then_disconnect() {
        let mut f = fixture();
        let token = f.gateway.connect(&mut f.conn, "bob@dylan.com", "toto1234!").unwrap();
        let token = Some(token.as_str());

        let me = f.gateway.me(&mut f.conn, token).unwrap();
        assert_eq!(me.email, "bob@dylan.com");

        let created = f.gateway.upload(&mut f.conn, token, image()).unwrap();
        assert_eq!(created.user_id, me.id);
        assert_eq!(f.gateway.show(&mut f.conn, token, created.id).unwrap(), created);
        assert_eq!(
            f.gateway.index(&mut f.conn, token, Parent::Root, 0).unwrap(),
            vec![created.clone()]
        );

        f.gateway.disconnect(&mut f.conn, token).unwrap();
        assert!(matches!(
            f.gateway.show(&mut f.conn, token, created.id),
            Err(FileStoreError::Unauthorized)
        ));
        assert!(matches!(
            f.gateway.disconnect(&mut f.conn, token),
            Err(FileStoreError::Unauthorized)
        ));
    }

    #[test]
    fn wrong_credentials_do_not_connect() {
        let mut f = fixture();
        for (email, password) in [
            ("bob@dylan.com", "nope"),
            ("bob@dylan.fr", "toto1234!"),
            ("", ""),
            ("bob@dylan.com", ""),
        ] {
            assert!(matches!(
                f.gateway.connect(&mut f.conn, email, password),
                Err(FileStoreError::Unauthorized)
            ));
        }
    }

    #[test]
    fn unauthorized_upload_never_reaches_the_tree() {
        let mut f = fixture();
        for token in [None, Some("bogus"), Some("")] {
            assert!(matches!(
                f.gateway.upload(&mut f.conn, token, image()),
                Err(FileStoreError::Unauthorized)
            ));
            assert!(matches!(
                f.gateway.index(&mut f.conn, token, Parent::Root, 0),
                Err(FileStoreError::Unauthorized)
            ));
        }
        assert_eq!(db::count_files(&mut f.conn).unwrap(), 0);
        assert!(f.jobs.jobs().is_empty());
    }

    #[test]
    fn show_of_foreign_file_is_not_found() {
        let mut f = fixture();
        db::gen_user(&mut f.conn, "alice@wonder.land", "pwd").unwrap();
        let bob = f.gateway.connect(&mut f.conn, "bob@dylan.com", "toto1234!").unwrap();
        let alice = f.gateway.connect(&mut f.conn, "alice@wonder.land", "pwd").unwrap();

        let created = f.gateway.upload(&mut f.conn, Some(bob.as_str()), image()).unwrap();
        let err = f
            .gateway
            .show(&mut f.conn, Some(alice.as_str()), created.id)
            .unwrap_err();
        assert!(matches!(err, FileStoreError::NotFound(_)));
        assert!(f
            .gateway
            .index(&mut f.conn, Some(alice.as_str()), Parent::Root, 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn public_content_ignores_bad_tokens() {
        let mut f = fixture();
        let bob = f.gateway.connect(&mut f.conn, "bob@dylan.com", "toto1234!").unwrap();
        let created = f.gateway.upload(&mut f.conn, Some(bob.as_str()), image()).unwrap();

        let (_, bytes) = f.gateway.content(&mut f.conn, Some("expired"), created.id).unwrap();
        assert_eq!(bytes, b"\x89PNG".to_vec());
        let (_, bytes) = f.gateway.content(&mut f.conn, None, created.id).unwrap();
        assert_eq!(bytes, b"\x89PNG".to_vec());
    }
}
