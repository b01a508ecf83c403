mod build;
mod catalog;
mod delivery;
mod env;
mod layout;
mod locks;
mod reconcile;
mod store;
mod validate;

#[cfg(test)]
mod testing;

use crate::build::{BuildRequest, Builder, Built};
use crate::catalog::{Catalog, Rename, Upload, Uploaded};
use crate::delivery::Download;
use crate::env::Settings;
use crate::layout::FileKind;
use crate::reconcile::Report;
use crate::store::ImageRecord;
use crate::validate::InvalidInput;
use error::chain;
use log::{debug, error, info};
use response::{Message, Response};
use result::Result;
use rocket::data::{ByteUnit, Limits};
use rocket::fairing::AdHoc;
use rocket::form::Form;
use rocket::http::Status;
use rocket::serde::json::{json, Json, Value};
use rocket::{catch, catchers, delete, get, post, put, routes, Build, Request, Rocket, State};

#[macro_use]
extern crate os;

/// Builds `ubuntu:<ubuntuVersion>` (pinned to `@sha256:<digest>` when a digest is given),
/// exports its `libc.so.6` and `ld-linux-x86-64.so.2` into the data root and registers them.
/// The call returns once the whole pipeline has finished, which may take minutes.
///
/// ```text
/// curl -X POST -H 'Content-Type: application/json' \
///     -d '{"ubuntuVersion": "22.04", "digest": ""}' http://localhost:3000/build-docker
/// ```
///
/// ```text
/// {
///   "message": "Docker image created and data inserted into database successfully.",
///   "imageTag": "22.04-latest"
/// }
/// ```
#[post("/build-docker", data = "<request>")]
async fn build_docker(
    request: Json<BuildRequest>,
    builder: &State<Builder>,
    catalog: &State<Catalog>,
) -> Result<Response<Built>> {
    Ok(build::build(builder, catalog, &request).await?.into())
}

/// Lists every record, oldest first.
///
/// ```text
/// [
///   {
///     "id": 1,
///     "docker_tag": "22.04-latest",
///     "libc": "/srv/libc-data/data/22.04-latest/libc.so.6",
///     "ld": "/srv/libc-data/data/22.04-latest/ld-linux-x86-64.so.2",
///     "created_at": "2024-05-01T09:30:12.123456Z"
///   }
/// ]
/// ```
#[get("/docker-files")]
async fn docker_files(catalog: &State<Catalog>) -> Result<Response<Vec<ImageRecord>>> {
    Ok(catalog.records().await?.into())
}

/// Streams the `libc` or `ld` of a record as an attachment.
#[get("/docker-files/<id>/download/<file_type>")]
async fn download(
    id: &str,
    file_type: std::result::Result<FileKind, InvalidInput>,
    catalog: &State<Catalog>,
) -> Result<Download> {
    let id = validate::id(id)?;
    delivery::download(catalog, id, file_type?).await
}

#[delete("/docker-files/<id>")]
async fn delete_docker_file(id: &str, catalog: &State<Catalog>) -> Result<Response<Message>> {
    let id = validate::id(id)?;
    Ok(catalog.delete(id).await?.into())
}

/// Registers a manually supplied pair of libraries under a tag of the caller's choosing.
///
/// ```text
/// curl -F dockerTag=22.04-custom -F libc=@libc.so.6 -F ld=@ld-linux-x86-64.so.2 \
///     http://localhost:3000/docker-files/upload
/// ```
#[post("/docker-files/upload", data = "<upload>")]
async fn upload_docker_files(
    upload: Form<Upload<'_>>,
    catalog: &State<Catalog>,
) -> Result<Response<Uploaded>> {
    Ok(catalog.upload(upload.into_inner()).await?.into())
}

/// Renames the tag of a record, moving its directory along with it.
#[put("/docker-files/<id>", data = "<rename>")]
async fn rename_docker_file(
    id: &str,
    rename: Json<Rename>,
    catalog: &State<Catalog>,
) -> Result<Response<Message>> {
    let id = validate::id(id)?;
    Ok(catalog.rename(id, &rename).await?.into())
}

/// Runs a reconciliation pass on demand and returns its report.
#[post("/fix-paths")]
async fn fix_paths(catalog: &State<Catalog>) -> Result<Response<Report>> {
    Ok(reconcile::reconcile(catalog).await?.into())
}

/// Everything that Rocket rejects before a handler ever runs (unknown routes, malformed JSON,
/// oversized uploads) is answered in the same JSON shape as every other error.
#[catch(default)]
fn rejected(status: Status, request: &Request<'_>) -> (Status, Json<Value>) {
    debug!("{} {} rejected with {}", request.method(), request.uri(), status);
    let body = json!({
        "error": status.reason().unwrap_or("Unknown Error"),
        "kind": "Rejected",
    });
    (status, Json(body))
}

/// Prepares the registry (data root, scratch root, store) and reconciles it before the first
/// request is accepted. A registry that cannot be opened aborts the launch.
async fn open(settings: &Settings) -> Result<Catalog> {
    let catalog = Catalog::open(settings).await?;
    reconcile::reconcile(&catalog).await?;
    Ok(catalog)
}

fn rocket(settings: Settings) -> Rocket<Build> {
    // A form carries two files plus a tag.
    let form_limit = ByteUnit::from(settings.max_upload_size.as_u64() * 2 + 1024 * 1024);
    let config = rocket::Config {
        address: settings.address,
        port: settings.port,
        limits: Limits::default()
            .limit("file", settings.max_upload_size)
            .limit("data-form", form_limit),
        ..rocket::Config::default()
    };
    let builder = Builder::from(&settings);
    rocket::custom(config)
        .manage(builder)
        .attach(AdHoc::try_on_ignite("Registry", move |rocket| async move {
            match open(&settings).await {
                Ok(catalog) => Ok(rocket.manage(catalog)),
                Err(err) => {
                    error!("Failed to open the registry: {}", chain(err.as_ref()));
                    Err(rocket)
                }
            }
        }))
        .mount(
            "/",
            routes![
                build_docker,
                docker_files,
                download,
                delete_docker_file,
                upload_docker_files,
                rename_docker_file,
                fix_paths
            ],
        )
        .register("/", catchers![rejected])
}

#[tokio::main]
async fn main() {
    std::env::set_var("RUST_LOG_STYLE", "always");
    env_logger::init();
    let settings = Settings::from_env();
    info!(
        "Starting on {}:{}",
        term_colors::bold(settings.address),
        term_colors::bold(settings.port)
    );
    match rocket(settings).launch().await {
        Ok(rocket) => {
            if let Some(catalog) = rocket.state::<Catalog>() {
                catalog.store.close().await;
            }
            info!("Shut down cleanly");
        }
        Err(err) => {
            error!("{}: {}", term_colors::failure("The service stopped"), err);
            std::process::exit(1);
        }
    }
}
