use std::error::Error;
use std::sync::Arc;

use files_manager::cleanup::CLEANUP_PERIOD;
use files_manager::conf::FilesConfig;
use files_manager::jobs::{self, ChannelDispatcher};
use files_manager::web::{self, FilesDbConn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let (dispatcher, receiver) = ChannelDispatcher::new();
    let app = web::build_app(FilesConfig::figment(), Arc::new(dispatcher))
        .ignite()
        .await?;

    let conn = FilesDbConn::get_one(&app)
        .await
        .ok_or("Cannot access connection pool")?;

    // the dispatcher lives in the app state, once the server is gone the
    // queue closes and the consumer returns
    let web_server = async {
        app.launch().await?;
        Ok::<_, Box<dyn Error>>(())
    };

    let thumbnail_jobs = async {
        jobs::drain(receiver).await;
        Ok::<_, Box<dyn Error>>(())
    };

    let background_job = tokio::spawn(web::cleanup_in_background(conn, CLEANUP_PERIOD));

    futures::try_join!(web_server, thumbnail_jobs)?;
    background_job.abort();

    Ok(())
}
