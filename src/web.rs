use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use diesel::sqlite::SqliteConnection;
use figment::Figment;
use rocket::fairing::{self, AdHoc};
use rocket::form::FromForm;
use rocket::http::{ContentType, Status};
use rocket::request::{self, FromRequest};
use rocket::serde::json::{self, serde_json, Json, Value};
use rocket::serde::{Deserialize, Serialize};
use rocket::{Build, Rocket, State};
use rocket_sync_db_pools::database;

use crate::blobs::DiskBlobStore;
use crate::cleanup;
use crate::conf::FilesConfig;
use crate::db::{self, UserId};
use crate::errors::{self, FileStoreError};
use crate::files::{File, FileId, FileTree, NewFile, Parent};
use crate::gateway::AccessGateway;
use crate::jobs::JobDispatcher;

/// Header carrying the session token on every authenticated call.
pub const TOKEN_HEADER: &str = "X-Token";

#[database("sqlite_files")]
pub struct FilesDbConn(SqliteConnection);

impl FilesDbConn {
    /// `run` with the per-connection pragmas applied first.
    pub async fn exec<T, F>(&self, f: F) -> errors::Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> errors::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(move |c| {
            db::prepare(c)?;
            f(c)
        })
        .await
    }
}

/// Raw value of the token header, if any. Resolving it is the gateway's job.
#[derive(Debug)]
pub struct XToken(Option<String>);

impl XToken {
    fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for XToken {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r rocket::Request<'_>) -> request::Outcome<Self, Self::Error> {
        let token = request.headers().get_one(TOKEN_HEADER).map(|t| t.to_string());
        request::Outcome::Success(XToken(token))
    }
}

#[derive(Debug)]
pub struct BasicAuth {
    email: String,
    password: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BasicAuth {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r rocket::Request<'_>) -> request::Outcome<Self, Self::Error> {
        let creds = request
            .headers()
            .get_one("Authorization")
            .and_then(|auth| auth.strip_prefix("Basic "))
            .and_then(parse_basic_auth);
        match creds {
            Some(creds) => request::Outcome::Success(creds),
            None => request::Outcome::Forward(Status::Unauthorized),
        }
    }
}

fn parse_basic_auth(encoded_creds: &str) -> Option<BasicAuth> {
    let bytes = base64::decode(encoded_creds.trim()).ok()?;
    let s = std::str::from_utf8(&bytes[..]).ok()?;
    let (email, password) = s.split_once(':')?;
    Some(BasicAuth {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
pub struct FileView {
    id: FileId,
    user_id: UserId,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    is_public: bool,
    parent_id: FileId,
}

impl From<File> for FileView {
    fn from(f: File) -> Self {
        FileView {
            id: f.id,
            user_id: f.user_id,
            name: f.name,
            kind: f.kind.as_str(),
            is_public: f.is_public,
            parent_id: match f.parent {
                Parent::Root => 0,
                Parent::Folder(id) => id,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct StatusView {
    db: bool,
    storage: bool,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct StatsView {
    users: i64,
    files: i64,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct TokenView {
    token: String,
}

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
struct UserView {
    id: UserId,
    email: String,
}

#[rocket::get("/status")]
async fn status(conn: FilesDbConn, gateway: &State<AccessGateway>) -> (Status, Json<StatusView>) {
    let db_alive = conn
        .exec(|c| Ok(db::is_alive(c)))
        .await
        .unwrap_or(false);
    let storage = gateway.tree().blobs().is_alive();
    let status = if db_alive && storage {
        Status::Ok
    } else {
        Status::ServiceUnavailable
    };
    (status, Json(StatusView { db: db_alive, storage }))
}

#[rocket::get("/stats")]
async fn stats(conn: FilesDbConn) -> errors::Result<Json<StatsView>> {
    let stats = conn
        .exec(|c| {
            Ok(StatsView {
                users: db::count_users(c)?,
                files: db::count_files(c)?,
            })
        })
        .await?;
    Ok(Json(stats))
}

#[rocket::get("/connect")]
async fn connect(
    auth: Option<BasicAuth>,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<Json<TokenView>> {
    let auth = auth.ok_or(FileStoreError::Unauthorized)?;
    let gateway = gateway.inner().clone();
    let token = conn
        .exec(move |c| gateway.connect(c, &auth.email, &auth.password))
        .await?;
    Ok(Json(TokenView { token: token.0 }))
}

#[rocket::get("/disconnect")]
async fn disconnect(
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<Status> {
    let gateway = gateway.inner().clone();
    conn.exec(move |c| gateway.disconnect(c, token.as_deref()))
        .await?;
    Ok(Status::NoContent)
}

#[rocket::get("/users/me")]
async fn get_me(
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<Json<UserView>> {
    let gateway = gateway.inner().clone();
    let user = conn.exec(move |c| gateway.me(c, token.as_deref())).await?;
    Ok(Json(UserView {
        id: user.id,
        email: user.email,
    }))
}

/// Ids arrive either as JSON numbers or as strings depending on the client.
#[derive(Deserialize, Debug)]
#[serde(crate = "rocket::serde", untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

/// `None` when the value can't possibly name a folder.
fn parse_parent(raw: Option<RawId>) -> Option<Parent> {
    let id = match raw {
        None => return Some(Parent::Root),
        Some(RawId::Number(n)) => n,
        Some(RawId::Text(s)) => s.trim().parse::<i64>().ok()?,
    };
    match id {
        0 => Some(Parent::Root),
        id if id > 0 => FileId::try_from(id).ok().map(Parent::Folder),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(crate = "rocket::serde", rename_all = "camelCase")]
struct UploadInput {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    is_public: bool,
    #[serde(default)]
    parent_id: Option<RawId>,
    /// base64 encoded content
    #[serde(default)]
    data: Option<String>,
}

impl UploadInput {
    fn into_new_file(self) -> errors::Result<NewFile> {
        let kind = self.kind.unwrap_or_default();
        // folders never keep bytes, don't bother decoding what they carry
        let data = match self.data {
            Some(data) if !data.is_empty() && kind != "folder" => Some(
                base64::decode(data.trim())
                    .map_err(|_| FileStoreError::validation("Invalid data"))?,
            ),
            _ => None,
        };
        // an id that can never exist is as missing as one that doesn't
        let parent = parse_parent(self.parent_id).unwrap_or(Parent::Folder(0));
        Ok(NewFile {
            name: self.name.unwrap_or_default(),
            kind,
            is_public: self.is_public,
            parent,
            data,
        })
    }
}

#[rocket::post("/files", data = "<input>")]
async fn post_upload(
    input: Result<Json<UploadInput>, json::Error<'_>>,
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<(Status, Json<FileView>)> {
    // a malformed body is only reported once the caller is known
    let input = input.map(Json::into_inner).map_err(|err| {
        log::debug!("unreadable upload body: {err}");
        FileStoreError::validation("Invalid body")
    });
    let gateway = gateway.inner().clone();
    let created = conn
        .exec(move |c| {
            gateway.authenticate(c, token.as_deref())?;
            let new_file = input?.into_new_file()?;
            gateway.upload(c, token.as_deref(), new_file)
        })
        .await?;
    Ok((Status::Created, Json(created.into())))
}

#[rocket::get("/files/<id>")]
async fn get_show(
    id: Result<FileId, &str>,
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<Json<FileView>> {
    let id = id.ok();
    let gateway = gateway.inner().clone();
    let found = conn
        .exec(move |c| match id {
            Some(id) => gateway.show(c, token.as_deref(), id),
            None => {
                gateway.authenticate(c, token.as_deref())?;
                Err(FileStoreError::not_found("Not found"))
            }
        })
        .await?;
    Ok(Json(found.into()))
}

#[derive(Debug, FromForm)]
struct IndexQuery<'r> {
    #[field(name = "parentId")]
    parent_id: Option<&'r str>,
    page: Option<&'r str>,
}

#[rocket::get("/files?<query..>")]
async fn get_index(
    query: IndexQuery<'_>,
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<Json<Vec<FileView>>> {
    let parent = parse_parent(query.parent_id.map(|p| RawId::Text(p.to_string())));
    let page = query
        .page
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let gateway = gateway.inner().clone();
    let files = conn
        .exec(move |c| match parent {
            Some(parent) => gateway.index(c, token.as_deref(), parent, page),
            None => {
                gateway.authenticate(c, token.as_deref())?;
                Ok(vec![])
            }
        })
        .await?;
    Ok(Json(files.into_iter().map(FileView::from).collect()))
}

#[rocket::get("/files/<id>/data")]
async fn get_file_data(
    id: Result<FileId, &str>,
    token: XToken,
    conn: FilesDbConn,
    gateway: &State<AccessGateway>,
) -> errors::Result<(ContentType, Vec<u8>)> {
    // public content needs no session, an id that can't exist is just missing
    let id = id.map_err(|_| FileStoreError::not_found("Not found"))?;
    let gateway = gateway.inner().clone();
    let (file, bytes) = conn
        .exec(move |c| gateway.content(c, token.as_deref(), id))
        .await?;
    let content_type = Path::new(&file.name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary);
    Ok((content_type, bytes))
}

#[rocket::catch(default)]
fn default_catcher(status: Status, _req: &rocket::Request<'_>) -> (Status, Json<Value>) {
    let message = match status.code {
        401 => "Unauthorized",
        404 => "Not found",
        _ => status.reason().unwrap_or("Error"),
    };
    (status, Json(serde_json::json!({ "error": message })))
}

async fn run_migrations(rocket: Rocket<Build>) -> fairing::Result {
    let conn = match FilesDbConn::get_one(&rocket).await {
        Some(conn) => conn,
        None => {
            log::error!("Cannot access connection pool");
            return Err(rocket);
        }
    };
    let migrated = conn.exec(db::run_migrations).await;
    match migrated {
        Ok(()) => Ok(rocket),
        Err(err) => {
            log::error!("failed to migrate the database: {err:?}");
            Err(rocket)
        }
    }
}

/// Purge expired sessions every `period` for as long as the server runs.
pub async fn cleanup_in_background(conn: FilesDbConn, period: Duration) {
    let conn = &conn;
    cleanup::purge_periodically(period, move || conn.exec(cleanup::cleanup_once)).await
}

pub fn build_app(figment: Figment, jobs: Arc<dyn JobDispatcher>) -> Rocket<Build> {
    // uploads are JSON bodies, rocket's 1MiB default would cap them.
    // A broken config is reported by the "File tree" fairing below.
    let figment = match figment.extract::<FilesConfig>() {
        Ok(conf) => figment.merge(("limits.json", conf.upload_limit.as_u64())),
        Err(_) => figment,
    };
    rocket::custom(figment)
        .mount(
            "/",
            rocket::routes![
                status,
                stats,
                connect,
                disconnect,
                get_me,
                post_upload,
                get_show,
                get_index,
                get_file_data
            ],
        )
        .register("/", rocket::catchers![default_catcher])
        .attach(FilesDbConn::fairing())
        .attach(AdHoc::try_on_ignite("Database migrations", run_migrations))
        .attach(AdHoc::try_on_ignite("File tree", move |rocket| async move {
            let conf: FilesConfig = match rocket.figment().extract() {
                Ok(conf) => conf,
                Err(err) => {
                    log::error!("invalid configuration: {err}");
                    return Err(rocket);
                }
            };
            log::info!("storing files under {}", conf.folder_path.to_string_lossy());
            match DiskBlobStore::new(&conf.folder_path) {
                Ok(blobs) => {
                    let tree = FileTree::new(Arc::new(blobs), jobs);
                    Ok(rocket.manage(AccessGateway::new(tree)))
                }
                Err(err) => {
                    log::error!("cannot open the blob store: {err:?}");
                    Err(rocket)
                }
            }
        }))
}
