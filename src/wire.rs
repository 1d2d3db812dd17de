use std::fmt::Debug;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{AuthConfig, CampdAuthSource, Session};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct CampdHandler {
    engine: Arc<Engine>,
    auth: Arc<AuthConfig>,
    query_parser: Arc<CampdQueryParser>,
}

impl CampdHandler {
    pub fn new(engine: Arc<Engine>, auth: Arc<AuthConfig>) -> Self {
        Self {
            engine,
            auth,
            query_parser: Arc::new(CampdQueryParser),
        }
    }

    /// The auth layer verified credentials at startup; here the username from
    /// the connection metadata is resolved into the session the core trusts.
    fn resolve_session<C: ClientInfo>(&self, client: &C) -> Session {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        self.auth.session_for(&user)
    }

    async fn execute_command(
        &self,
        session: &Session,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch(session, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(&self, session: &Session, cmd: Command) -> PgWireResult<Vec<Response>> {
        if requires_admin(&cmd) && !session.is_admin() {
            return Err(engine_err(EngineError::Forbidden));
        }

        match cmd {
            Command::InsertCampsite { id, name, nightly_price, daily_capacity } => {
                self.engine
                    .create_campsite(id, name, nightly_price, daily_capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateCampsite { id, name, nightly_price, daily_capacity } => {
                self.engine
                    .update_campsite(id, name, nightly_price, daily_capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeactivateCampsite { id } => {
                self.engine.deactivate_campsite(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertEquipment { id, name, price, stock } => {
                self.engine
                    .create_equipment(id, name, price, stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateEquipment { id, name, price, stock } => {
                self.engine
                    .update_equipment(id, name, price, stock)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeactivateEquipment { id } => {
                self.engine.deactivate_equipment(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { id, campsite_id, range, people, equipment } => {
                self.engine
                    .create_booking(id, &session.user, campsite_id, range, people, &equipment)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::ReplaceEquipment { booking_id, equipment } => {
                self.engine
                    .replace_equipment(booking_id, session, &equipment)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SetStatus { booking_id, status } => {
                self.engine
                    .set_booking_status(booking_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::AttachPaymentProof { booking_id, reference } => {
                self.engine
                    .attach_payment_proof(booking_id, session, &reference)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability { campsite_id, range } => {
                let days = self
                    .engine
                    .campsite_availability(campsite_id, range)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|du| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&format_day(du.day))?;
                        encoder.encode_field(&(du.used as i64))?;
                        encoder.encode_field(&(du.remaining as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectEquipmentAvailability { range } => {
                let rows_data = self
                    .engine
                    .equipment_availability(range)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(equipment_availability_schema());
                let rows: Vec<PgWireResult<_>> = rows_data
                    .into_iter()
                    .map(|row| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&row.equipment_id.to_string())?;
                        encoder.encode_field(&format_day(row.day))?;
                        encoder.encode_field(&(row.stock as i64))?;
                        encoder.encode_field(&(row.available as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectCampsites => {
                let campsites = self.engine.list_campsites().await;
                let schema = Arc::new(campsites_schema());
                let rows: Vec<PgWireResult<_>> = campsites
                    .into_iter()
                    .map(|cs| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&cs.id.to_string())?;
                        encoder.encode_field(&cs.name)?;
                        encoder.encode_field(&cs.nightly_price)?;
                        encoder.encode_field(&(cs.daily_capacity as i64))?;
                        encoder.encode_field(&cs.is_active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectEquipment => {
                let items = self.engine.list_equipment().await;
                let schema = Arc::new(equipment_schema());
                let rows: Vec<PgWireResult<_>> = items
                    .into_iter()
                    .map(|eq| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&eq.id.to_string())?;
                        encoder.encode_field(&eq.name)?;
                        encoder.encode_field(&eq.price)?;
                        encoder.encode_field(&(eq.stock as i64))?;
                        encoder.encode_field(&eq.is_active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { booking_id, campsite_id } => {
                let bookings = match booking_id {
                    Some(id) => {
                        vec![self.engine.booking_view(id, session).await.map_err(engine_err)?]
                    }
                    None => self.engine.list_bookings(session, campsite_id).await,
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| encode_booking(&schema, &b))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let campsite_id_str = channel.strip_prefix("campsite_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected campsite_{{id}})"),
                    )))
                })?;
                let _campsite_id = Ulid::from_string(campsite_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

/// Catalog mutations and status transitions are admin operations; ownership
/// checks on booking edits happen inside the engine.
fn requires_admin(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::InsertCampsite { .. }
            | Command::UpdateCampsite { .. }
            | Command::DeactivateCampsite { .. }
            | Command::InsertEquipment { .. }
            | Command::UpdateEquipment { .. }
            | Command::DeactivateEquipment { .. }
            | Command::SetStatus { .. }
    )
}

fn encode_booking(
    schema: &Arc<Vec<FieldInfo>>,
    booking: &BookingState,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&booking.id.to_string())?;
    encoder.encode_field(&booking.user)?;
    encoder.encode_field(&booking.campsite_id.to_string())?;
    encoder.encode_field(&format_day(booking.range.start))?;
    encoder.encode_field(&format_day(booking.range.end))?;
    encoder.encode_field(&(booking.people as i64))?;
    encoder.encode_field(&booking.status.as_str())?;
    encoder.encode_field(&booking.total_price)?;
    encoder.encode_field(&booking.created_at)?;
    encoder.encode_field(&booking.payment_proof)?;
    let equipment_json = serde_json::to_string(&booking.attachments)
        .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    encoder.encode_field(&equipment_json)?;
    Ok(encoder.take_row())
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("day"), int8_field("used"), int8_field("remaining")]
}

fn equipment_availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("equipment_id"),
        text_field("day"),
        int8_field("stock"),
        int8_field("available"),
    ]
}

fn campsites_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("nightly_price"),
        int8_field("daily_capacity"),
        bool_field("is_active"),
    ]
}

fn equipment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        int8_field("price"),
        int8_field("stock"),
        bool_field("is_active"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("user"),
        text_field("campsite_id"),
        text_field("start_date"),
        text_field("end_date"),
        int8_field("people"),
        text_field("status"),
        int8_field("total_price"),
        int8_field("created_at"),
        text_field("payment_proof"),
        text_field("equipment"),
    ]
}

fn result_schema_for(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("EQUIPMENT_AVAILABILITY") {
        equipment_availability_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("CAMPSITES") {
        campsites_schema()
    } else if upper.contains("EQUIPMENT") {
        equipment_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CampdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let session = self.resolve_session(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&session, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CampdQueryParser;

#[async_trait]
impl QueryParser for CampdQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CampdHandler {
    type Statement = String;
    type QueryParser = CampdQueryParser;

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
        let session = self.resolve_session(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&session, cmd).await?;
        Ok(responses.remove(0))
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CampdFactory {
    handler: Arc<CampdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<CampdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CampdFactory {
    pub fn new(engine: Arc<Engine>, auth: Arc<AuthConfig>) -> Self {
        let auth_source = CampdAuthSource::new(auth.clone());
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CampdHandler::new(engine, auth)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CampdFactory {
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

/// Serve one client connection. The engine and auth config are injected —
/// connection handling owns nothing global.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    auth: Arc<AuthConfig>,
    tls: Option<TlsAcceptor>,
) -> Result<(), io::Error> {
    let factory = CampdFactory::new(engine, auth);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Invalid(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::CapacityExceeded { .. } => "P0001",
        EngineError::Forbidden => "42501",
        EngineError::Conflict(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "XX000",
    };
    // Internal failures are logged with full context and reported opaquely.
    let message = if let EngineError::WalError(_) = &e {
        tracing::error!("internal failure: {e}");
        "internal error".to_string()
    } else {
        e.to_string()
    };
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
