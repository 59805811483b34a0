use std::sync::Arc;

use actix_web::web::{self, Data, FormConfig, JsonConfig, PathConfig, QueryConfig};
use actix_web::{App, HttpServer, ResponseError};
use mongodb::Client;
use tracing::info;
use tracing_actix_web::TracingLogger;

pub mod audit;
pub mod campaign;
pub mod channel;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod lead;
pub mod ledger;
pub mod seed;
pub mod template;
pub mod typedid;
pub mod utils;

pub use crate::campaign::{
    CampaignBody, CreateCampaignBody, PreviewBody, StartCampaignBody, UpdateCampaignBody,
};
pub use crate::error::Error;

use crate::campaign::manager::CampaignLocks;
use crate::channel::graph::{GraphClient, MessengerAdapter, WhatsAppAdapter};
use crate::config::Config;
use crate::database::{Database, MongoDatabase};
use crate::dispatch::worker::{DispatchConfig, Dispatcher};
use crate::events::EventBus;
use crate::ledger::manager::StatsCache;

pub fn run(seed_data: bool) -> Result<(), Error> {
    actix_web::rt::System::new().block_on(serve(seed_data))
}

async fn serve(seed_data: bool) -> Result<(), Error> {
    let config = Config::from_env();

    info!("connecting to db: {}", config.mongodb_uri);
    let db = Client::with_uri_str(&config.mongodb_uri)
        .await?
        .database(&config.database_name);
    let db = MongoDatabase::initialize(db).await?;

    if seed_data {
        seed::seed(&db).await?;
    }

    let db: Arc<dyn Database> = Arc::new(db);
    let locks = Arc::new(CampaignLocks::new());
    let events = EventBus::default();
    let stats = Arc::new(StatsCache::new());
    stats.spawn_invalidator(events.subscribe());

    let graph = GraphClient::new(
        config.graph_api_base.clone(),
        config.graph_access_token.clone(),
        config.send_timeout,
    );
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&db),
        events.clone(),
        DispatchConfig {
            workers_per_channel: config.workers_per_channel,
            max_send_attempts: config.max_send_attempts,
            retry_base_delay: config.retry_base_delay,
            poll_interval: config.worker_poll_interval,
        },
    );
    dispatcher.register_channel(
        Arc::new(MessengerAdapter::new(graph.clone())),
        config.messenger_rate_per_sec,
    );
    dispatcher.register_channel(
        Arc::new(WhatsAppAdapter::new(
            graph,
            config.whatsapp_phone_number_id.clone(),
        )),
        config.whatsapp_rate_per_sec,
    );
    dispatcher.spawn();

    campaign::scheduler::spawn(
        Arc::clone(&db),
        Arc::clone(&locks),
        events.clone(),
        config.scheduler_interval,
    );

    let db = Data::from(db);
    let locks = Data::from(locks);
    let events = Data::new(events);
    let stats = Data::from(stats);

    HttpServer::new(move || {
        App::new()
            .app_data(JsonConfig::default().error_handler(|err, _req| {
                // format json errors with custom format
                Error::InvalidJson(err).into()
            }))
            .app_data(PathConfig::default().error_handler(|err, _req| {
                // format path errors with custom format
                Error::InvalidPath(err).into()
            }))
            .app_data(FormConfig::default().error_handler(|err, _req| {
                // format form errors with custom format
                Error::InvalidForm(err).into()
            }))
            .app_data(QueryConfig::default().error_handler(|err, _req| {
                // format query errors with custom format
                Error::InvalidQuery(err).into()
            }))
            .app_data(db.clone())
            .app_data(locks.clone())
            .app_data(events.clone())
            .app_data(stats.clone())
            .wrap(TracingLogger::default())
            .service(campaign::endpoints::create_campaign)
            .service(campaign::endpoints::get_campaigns)
            .service(campaign::endpoints::get_campaign_by_id)
            .service(campaign::endpoints::update_campaign)
            .service(campaign::endpoints::start_campaign)
            .service(campaign::endpoints::pause_campaign)
            .service(campaign::endpoints::resume_campaign)
            .service(campaign::endpoints::cancel_campaign)
            .service(campaign::endpoints::preview_campaign)
            .service(dispatch::endpoints::get_queues)
            .default_service(web::to(|| async { Error::PathDoesNotExist.error_response() }))
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}
