use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RentDeskAuthSource;
use crate::engine::{EngineError, ReservationService};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct RentDeskHandler {
    service: Arc<ReservationService>,
    query_parser: Arc<RentDeskQueryParser>,
}

impl RentDeskHandler {
    pub fn new(service: Arc<ReservationService>) -> Self {
        Self {
            service,
            query_parser: Arc::new(RentDeskQueryParser),
        }
    }

    async fn run(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    /// Every statement answers with booking rows: mutations return the
    /// affected booking, reads return zero or more.
    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let bookings = match cmd {
            Command::InsertBooking {
                resource_id,
                renter_id,
                start,
                end,
            } => {
                let period = Period::try_new(start, end).map_err(engine_err)?;
                vec![self
                    .service
                    .create(resource_id, renter_id, period)
                    .await
                    .map_err(engine_err)?]
            }
            Command::UpdateBooking {
                id,
                resource_id,
                renter_id,
                start,
                end,
            } => {
                let period = Period::try_new(start, end).map_err(engine_err)?;
                vec![self
                    .service
                    .update(id, resource_id, renter_id, period)
                    .await
                    .map_err(engine_err)?]
            }
            Command::DeleteBooking { id } => {
                vec![self.service.delete(id).await.map_err(engine_err)?]
            }
            Command::SelectBooking { id } => {
                vec![self.service.get(id).await.map_err(engine_err)?]
            }
            Command::SelectBookings => self.service.list().await.map_err(engine_err)?,
            Command::SelectResourceBookings { resource_id } => self
                .service
                .list_by_resource(resource_id)
                .await
                .map_err(engine_err)?,
        };

        Ok(Response::Query(booking_rows(bookings, format)))
    }
}

const BOOKING_COLUMNS: [&str; 5] = ["id", "resource_id", "renter_id", "period_start", "period_end"];

fn bookings_schema(format: &Format) -> Vec<FieldInfo> {
    BOOKING_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            FieldInfo::new((*name).into(), None, None, Type::INT8, format.format_for(i))
        })
        .collect()
}

fn booking_rows(bookings: Vec<Booking>, format: &Format) -> QueryResponse {
    let schema = Arc::new(bookings_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id)?;
            encoder.encode_field(&b.resource_id)?;
            encoder.encode_field(&b.renter_id)?;
            encoder.encode_field(&b.period.start)?;
            encoder.encode_field(&b.period.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    QueryResponse::new(schema, stream::iter(rows))
}

#[async_trait]
impl SimpleQueryHandler for RentDeskHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let response = self.run(query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentDeskQueryParser;

#[async_trait]
impl QueryParser for RentDeskQueryParser {
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
        Ok(vec![Type::INT8; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        _stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(bookings_schema(column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentDeskHandler {
    type Statement = String;
    type QueryParser = RentDeskQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal)?;
        self.run(&sql, &portal.result_column_format).await
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
        let param_types = vec![Type::INT8; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            bookings_schema(&Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(bookings_schema(
            &target.result_column_format,
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
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    max = max.max(n);
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Render one bound INT8 parameter as a SQL literal.
fn param_literal(value: Option<&[u8]>, format: FieldFormat) -> PgWireResult<String> {
    let Some(bytes) = value else {
        return Ok("NULL".to_string());
    };
    match format {
        FieldFormat::Binary => {
            let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                let msg = format!("expected 8-byte int8 parameter, got {} bytes", bytes.len());
                user_error("08P01", msg)
            })?;
            Ok(i64::from_be_bytes(raw).to_string())
        }
        FieldFormat::Text => {
            let text = String::from_utf8_lossy(bytes);
            Ok(format!("'{}'", text.replace('\'', "''")))
        }
    }
}

/// Substitute $1, $2, ... placeholders with bound parameter values.
fn substitute_params(portal: &Portal<String>) -> PgWireResult<String> {
    let mut result = portal.statement.statement.to_string();

    // Highest index first so $1 never clobbers the prefix of $10.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let format = portal.parameter_format.format_for(i);
        let value = param_literal(param.as_deref(), format)?;
        result = result.replace(&placeholder, &value);
    }

    Ok(result)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RentDeskFactory {
    handler: Arc<RentDeskHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RentDeskAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RentDeskFactory {
    pub fn new(service: Arc<ReservationService>, password: String) -> Self {
        let auth_source = RentDeskAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentDeskHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentDeskFactory {
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
    service: Arc<ReservationService>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(RentDeskFactory::new(service, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure class.
pub fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::Conflict(_) => "23P01",
        EngineError::Storage(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = if e.is_validation() { "22023" } else { "42601" };
    user_error(code, e.to_string())
}
