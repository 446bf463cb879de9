use crate::logs::{LogFrame, LogHub, LogKey, LogType, SubscriptionId};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Close the socket when the viewer has not answered for this long
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub repository_id: String,
    pub branch: String,
    pub log_type: LogType,
}

/// One live log viewer.
pub struct LogViewer {
    session_id: Uuid,
    key: LogKey,
    hub: Arc<LogHub>,
    subscription: Option<SubscriptionId>,
    hb: Instant,
}

impl LogViewer {
    pub fn new(key: LogKey, hub: Arc<LogHub>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            key,
            hub,
            subscription: None,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(session_id = %act.session_id, "Log viewer heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for LogViewer {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            session_id = %self.session_id,
            repository_id = %self.key.repository_id,
            branch = %self.key.branch,
            log_type = %self.key.log_type,
            "Log viewer connected"
        );
        self.hb(ctx);
        let recipient = ctx.address().recipient::<LogFrame>();
        self.subscription = Some(self.hub.subscribe(self.key.clone(), Arc::new(recipient)));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.subscription.take() {
            self.hub.unsubscribe(&self.key, id);
        }
        tracing::info!(session_id = %self.session_id, "Log viewer disconnected");
    }
}

impl actix::Handler<LogFrame> for LogViewer {
    type Result = ();

    fn handle(&mut self, frame: LogFrame, ctx: &mut Self::Context) {
        match serde_json::to_string(&frame) {
            Ok(text) => ctx.text(text),
            Err(err) => tracing::error!("Failed to encode log frame: {}", err),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LogViewer {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, "Log viewer protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /logs/ws?repository_id=..&branch=..&log_type=build|runtime`
#[tracing::instrument(name = "Log viewer connection", skip(req, stream, hub))]
pub async fn log_socket(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<LogQuery>,
    hub: web::Data<Arc<LogHub>>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner();
    let key = LogKey::new(query.repository_id, query.branch, query.log_type);
    ws::start(LogViewer::new(key, hub.get_ref().clone()), &req, stream)
}
