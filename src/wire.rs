use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use jiff::Timestamp;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{self, SpotbookAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self as obs, command_label};
use crate::sql::{self, Command, RowShape, SqlError};

pub struct SpotbookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SpotbookQueryParser>,
}

impl SpotbookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SpotbookQueryParser),
        }
    }

    /// The session user, which must be a ULID.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<ActorId> {
        let user = client.metadata().get("user").map(String::as_str);
        auth::session_actor(user).map_err(|e| {
            metrics::counter!(obs::AUTH_FAILURES_TOTAL).increment(1);
            user_error("28000", e.to_string())
        })
    }

    /// Parse, execute and record metrics for one statement.
    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(actor, cmd, format).await;
        metrics::histogram!(obs::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "ok",
            Err(EngineError::Rejected(rejection)) => {
                metrics::counter!(
                    obs::BOOKING_REJECTIONS_TOTAL,
                    "command" => label,
                    "kind" => rejection.kind().as_str()
                )
                .increment(1);
                "rejected"
            }
            Err(_) => "error",
        };
        metrics::counter!(obs::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        result.map_err(engine_err)?
    }

    async fn execute_command(
        &self,
        actor: ActorId,
        cmd: Command,
        format: &Format,
    ) -> Result<PgWireResult<Response>, EngineError> {
        let engine = &self.engine;
        let response = match cmd {
            Command::InsertSpot { id, name } => {
                engine.create_spot(id, actor, name).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteSpot { id } => {
                engine.delete_spot(id, actor).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                id,
                spot_id,
                stay,
                returning,
            } => {
                let reservation = engine
                    .create_booking(NewBooking {
                        id: id.unwrap_or_else(Ulid::new),
                        spot_id,
                        guest_id: actor,
                        stay,
                    })
                    .await?;
                if returning {
                    let name = self.spot_name(spot_id).await;
                    booking_rows([BookingRow::full(&reservation, name)], format)
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
                }
            }
            Command::UpdateBooking {
                id,
                stay,
                returning,
            } => {
                let reservation = engine
                    .reschedule_booking(id, actor, stay, Moment::now().today)
                    .await?;
                if returning {
                    let name = self.spot_name(reservation.spot_id).await;
                    booking_rows([BookingRow::full(&reservation, name)], format)
                } else {
                    Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
                }
            }
            Command::DeleteBooking { id } => {
                let spot_id = engine
                    .cancel_booking(id, actor, Moment::now().today)
                    .await?;
                tracing::debug!(%id, %spot_id, "booking cancelled");
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSpots => spot_rows(engine.list_spots().await, format),
            Command::SelectSpotBookings { spot_id } => {
                let views = engine.spot_bookings(spot_id, actor).await?;
                let name = self.spot_name(spot_id).await;
                booking_rows(
                    views.iter().map(|view| match view {
                        SpotBookingView::Full(r) => BookingRow::full(r, name.clone()),
                        SpotBookingView::Dates { spot_id, stay } => BookingRow {
                            id: None,
                            spot_id: *spot_id,
                            spot_name: name.clone(),
                            guest_id: None,
                            stay: *stay,
                            created_at: None,
                            updated_at: None,
                        },
                    }),
                    format,
                )
            }
            Command::SelectOwnBookings => {
                let bookings = engine.guest_bookings(actor).await;
                booking_rows(
                    bookings
                        .into_iter()
                        .map(|b| BookingRow::full(&b.reservation, b.spot_name)),
                    format,
                )
            }
        };
        Ok(response)
    }

    async fn spot_name(&self, spot_id: Ulid) -> Option<String> {
        let spot = self.engine.get_spot(&spot_id)?;
        let guard = spot.read().await;
        guard.name.clone()
    }
}

// ── Result sets ──────────────────────────────────────────────────

/// One row of the `bookings` result set. Fields a viewer may not see are `None`.
struct BookingRow {
    id: Option<Ulid>,
    spot_id: Ulid,
    spot_name: Option<String>,
    guest_id: Option<ActorId>,
    stay: Stay,
    created_at: Option<Timestamp>,
    updated_at: Option<Timestamp>,
}

impl BookingRow {
    fn full(r: &Reservation, spot_name: Option<String>) -> Self {
        Self {
            id: Some(r.id),
            spot_id: r.spot_id,
            spot_name,
            guest_id: Some(r.guest_id),
            stay: r.stay,
            created_at: Some(r.created_at),
            updated_at: Some(r.updated_at),
        }
    }
}

fn text_fields(names: &[&str], format: &Format) -> Vec<FieldInfo> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            FieldInfo::new(
                name.to_string(),
                None,
                None,
                Type::VARCHAR,
                format.format_for(i),
            )
        })
        .collect()
}

fn spots_schema(format: &Format) -> Vec<FieldInfo> {
    text_fields(&["id", "owner_id", "name"], format)
}

/// Dates are ISO `YYYY-MM-DD`, timestamps RFC 3339.
fn bookings_schema(format: &Format) -> Vec<FieldInfo> {
    text_fields(
        &[
            "id",
            "spot_id",
            "spot_name",
            "guest_id",
            "start_date",
            "end_date",
            "created_at",
            "updated_at",
        ],
        format,
    )
}

fn spot_rows(spots: Vec<SpotInfo>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(spots_schema(format));
    let rows: Vec<PgWireResult<_>> = spots
        .into_iter()
        .map(|spot| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&spot.id.to_string())?;
            encoder.encode_field(&spot.owner_id.to_string())?;
            encoder.encode_field(&spot.name)?;
            Ok(encoder.take_row())
        })
        .collect();

    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(
    bookings: impl IntoIterator<Item = BookingRow>,
    format: &Format,
) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&row.id.map(|id| id.to_string()))?;
            encoder.encode_field(&row.spot_id.to_string())?;
            encoder.encode_field(&row.spot_name)?;
            encoder.encode_field(&row.guest_id.map(|id| id.to_string()))?;
            encoder.encode_field(&row.stay.start.to_string())?;
            encoder.encode_field(&row.stay.end.to_string())?;
            encoder.encode_field(&row.created_at.map(|t| t.to_string()))?;
            encoder.encode_field(&row.updated_at.map(|t| t.to_string()))?;
            Ok(encoder.take_row())
        })
        .collect();

    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns for a statement, without running it.
fn describe_schema(sql: &str, format: &Format) -> PgWireResult<Vec<FieldInfo>> {
    Ok(match sql::describe_sql(sql).map_err(sql_err)? {
        Some(RowShape::Spots) => spots_schema(format),
        Some(RowShape::Bookings) => bookings_schema(format),
        None => vec![],
    })
}

#[async_trait]
impl SimpleQueryHandler for SpotbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let response = self.run(client, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpotbookQueryParser;

#[async_trait]
impl QueryParser for SpotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let format = column_format.unwrap_or(&Format::UnifiedText);
        describe_schema(stmt, format)
    }
}

#[async_trait]
impl ExtendedQueryHandler for SpotbookHandler {
    type Statement = String;
    type QueryParser = SpotbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement, &Format::UnifiedText)?,
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
            &target.result_column_format,
        )?))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass over `sql`; bound text is never rescanned.
/// Placeholders without a bound value are left as written.
fn bind_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let digits = i + 1;
        let mut j = digits;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        let param = sql[digits..j]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            result.push_str(&sql[copied..i]);
            match param {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = j;
        }
        i = j;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpotbookFactory {
    handler: Arc<SpotbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SpotbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SpotbookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SpotbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SpotbookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpotbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SpotbookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for an engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    use crate::booking::RejectionKind;
    match e {
        EngineError::Rejected(rejection) => match rejection.kind() {
            RejectionKind::NotFound => "P0002",
            RejectionKind::Forbidden => "42501",
            RejectionKind::InvalidArgument => "22023",
            RejectionKind::Conflict => "23P01",
        },
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(io) = &e {
        tracing::error!("WAL write failed: {io}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
