use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::HotelAuthSource;
use crate::engine::{Hotel, HotelError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    hotel: Arc<Hotel>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(HotelFactory::new(hotel, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct HotelHandler {
    hotel: Arc<Hotel>,
    query_parser: Arc<HotelQueryParser>,
}

impl HotelHandler {
    pub fn new(hotel: Arc<Hotel>) -> Self {
        Self {
            hotel,
            query_parser: Arc::new(HotelQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result.map_err(hotel_err)?
    }

    async fn execute_command(
        &self,
        cmd: Command,
        format: &Format,
    ) -> Result<PgWireResult<Response>, HotelError> {
        let hotel = &self.hotel;
        Ok(match cmd {
            Command::SelectRooms { id: None } => room_rows(hotel.list_rooms().await?, format),
            Command::SelectRooms { id: Some(id) } => {
                room_rows(vec![hotel.get_room(id).await?], format)
            }
            Command::InsertRoom(room) => {
                hotel.create_room(room).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                hotel.delete_room(id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectAvailability { checkin, checkout } => {
                room_rows(hotel.find_available(&checkin, &checkout).await?, format)
            }
            Command::InsertReservation { room_id, request } => {
                let reservation = hotel.create_reservation(room_id, request).await?;
                let views = ReservationView::from_reservation(&reservation)
                    .into_iter()
                    .collect();
                reservation_rows(views, format)
            }
            Command::SelectReservations { code, name } => reservation_rows(
                hotel.lookup_reservations(code.as_deref(), name.as_deref()).await?,
                format,
            ),
            Command::DeleteReservation { id, code, name } => {
                hotel
                    .cancel_reservation(id, code.as_deref(), name.as_deref())
                    .await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
        })
    }
}

// ── Result sets ──────────────────────────────────────────────────

const ROOM_COLUMNS: [(&str, Type); 10] = [
    ("id", Type::VARCHAR),
    ("number", Type::INT8),
    ("capacity", Type::INT8),
    ("floor", Type::INT8),
    ("image", Type::VARCHAR),
    ("price", Type::INT8),
    ("wifi", Type::BOOL),
    ("parking", Type::BOOL),
    ("breakfast", Type::BOOL),
    ("reservations", Type::INT8),
];

const RESERVATION_COLUMNS: [(&str, Type); 9] = [
    ("id", Type::VARCHAR),
    ("code", Type::VARCHAR),
    ("name", Type::VARCHAR),
    ("created_at", Type::VARCHAR),
    ("checkin", Type::VARCHAR),
    ("checkout", Type::VARCHAR),
    ("room_id", Type::VARCHAR),
    ("room_number", Type::INT8),
    ("room", Type::VARCHAR),
];

fn schema(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new(name.to_string(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn room_schema(format: &Format) -> Vec<FieldInfo> {
    schema(&ROOM_COLUMNS, format)
}

fn reservation_schema(format: &Format) -> Vec<FieldInfo> {
    schema(&RESERVATION_COLUMNS, format)
}

fn room_rows(rooms: Vec<RoomInfo>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(room_schema(format));
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|room| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&room.id.to_string())?;
            encoder.encode_field(&i64::from(room.number))?;
            encoder.encode_field(&i64::from(room.capacity))?;
            encoder.encode_field(&i64::from(room.floor))?;
            encoder.encode_field(&room.image)?;
            encoder.encode_field(&i64::from(room.price))?;
            encoder.encode_field(&room.wifi)?;
            encoder.encode_field(&room.parking)?;
            encoder.encode_field(&room.breakfast)?;
            encoder.encode_field(&(room.reservations as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservation_rows(views: Vec<ReservationView>, format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema(format));
    let rows: Vec<PgWireResult<_>> = views
        .into_iter()
        .map(|view| {
            let first = view.rooms.first();
            let rooms_json = serde_json::to_string(&view.rooms)
                .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&view.id.to_string())?;
            encoder.encode_field(&view.code)?;
            encoder.encode_field(&view.name)?;
            encoder.encode_field(&view.created_at.to_rfc3339())?;
            encoder.encode_field(&view.checkin.to_rfc3339())?;
            encoder.encode_field(&view.checkout.to_rfc3339())?;
            encoder.encode_field(&first.map(|r| r.room_id.to_string()))?;
            encoder.encode_field(&first.map(|r| i64::from(r.number)))?;
            encoder.encode_field(&rooms_json)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Columns a statement will return, decided from its text alone.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    let reservations = upper.contains("RESERVATIONS");
    if upper.starts_with("SELECT") {
        if reservations {
            reservation_schema(format)
        } else {
            room_schema(format)
        }
    } else if upper.starts_with("INSERT") && reservations {
        reservation_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for HotelHandler {
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
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HotelQueryParser;

#[async_trait]
impl QueryParser for HotelQueryParser {
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
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HotelHandler {
    type Statement = String;
    type QueryParser = HotelQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
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
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Byte ranges and indexes of `$N` placeholders outside quoted literals.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Render one bound parameter as a SQL literal (text format).
fn param_literal(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            format!("'{}'", text.replace('\'', "''"))
        }
        None => "NULL".to_string(),
    }
}

/// Replace each placeholder with its bound value in one left-to-right pass.
/// Inserted values are never scanned again. Placeholders without a bound
/// value are left as written.
fn substitute_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        result.push_str(&param_literal(param.as_ref().map(AsRef::as_ref)));
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HotelFactory {
    handler: Arc<HotelHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<HotelAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HotelFactory {
    pub fn new(hotel: Arc<Hotel>, password: String) -> Self {
        let auth_source = HotelAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HotelHandler::new(hotel)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelFactory {
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

fn hotel_err(e: HotelError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        e.sqlstate().into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
