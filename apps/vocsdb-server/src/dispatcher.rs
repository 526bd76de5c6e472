//! Request Dispatcher (§4.5): authorizes and routes one [`RequestEnvelope`]
//! at a time against the Entity Store, translating [`DispatchError`] into
//! the wire error taxonomy (§7). Login, scope authorization, and op routing
//! all live here; the connection/session bookkeeping is [`crate::connection::Registry`].

use std::sync::Arc;

use ldap3::LdapConnAsync;
use ldap_import_plugin::{ImportRequest, Service as LdapImportService};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{instrument, warn};
use vocsdb::{DispatchError, EntityStore};
use vocsdb_security::Scope;
use vocsdb_sdk::{EntityKind, ErrorPayload, KeysetLayout, RequestEnvelope, ResponseEnvelope};

use crate::config::ServerConfig;
use crate::connection::{ConnectionId, Registry, SessionId};

const ALL_ENTITY_KINDS: [EntityKind; 5] = [
    EntityKind::Domain,
    EntityKind::Project,
    EntityKind::User,
    EntityKind::Role,
    EntityKind::Loop,
];

/// Ties the Entity Store, the LDAP import worker, the connection registry,
/// and server configuration together behind one [`Dispatcher::handle`]
/// entry point.
pub struct Dispatcher {
    store: Arc<EntityStore>,
    ldap: Arc<LdapImportService>,
    registry: Registry,
    config: ServerConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(store: Arc<EntityStore>, ldap: Arc<LdapImportService>, config: ServerConfig) -> Self {
        Self {
            store,
            ldap,
            registry: Registry::new(),
            config,
        }
    }

    /// Route `request` from `connection_id` and build its response
    /// envelope. Never panics on a malformed or unauthorized request: every
    /// failure is folded into an `error` envelope per §7.
    #[instrument(skip(self, request), fields(event = %request.event, uuid = %request.uuid))]
    pub async fn handle(&self, connection_id: ConnectionId, request: RequestEnvelope) -> ResponseEnvelope {
        match self.dispatch(connection_id, &request).await {
            Ok(value) => ResponseEnvelope::success(request.event.clone(), request.uuid.clone(), value),
            Err(err) => {
                warn!(code = err.code(), description = %err.description(), "request failed");
                ResponseEnvelope::failure(
                    request.event.clone(),
                    request.uuid.clone(),
                    ErrorPayload {
                        code: err.code(),
                        description: err.description(),
                    },
                )
            }
        }
    }

    async fn dispatch(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        match request.event.as_str() {
            "login" => self.login(connection_id, request).await,
            "update_login" => self.update_login(connection_id, request),
            "logout" => {
                self.registry.logout(connection_id);
                Ok(Value::Null)
            }
            "update_password" => self.update_password(connection_id, request),
            "admin_domains" => self.admin_domains(connection_id, request),
            "admin_projects" => self.admin_projects(connection_id, request),
            "check_id_exists" => self.check_id_exists(connection_id, request),
            "get" => self.get_entity(connection_id, request),
            "create" => self.create_entity(connection_id, request),
            "delete" => self.delete_entity(connection_id, request),
            "get_key" => self.get_key(connection_id, request),
            "update_key" => self.update_key(connection_id, request),
            "delete_key" => self.delete_key(connection_id, request),
            "verify" => self.verify_item(connection_id, request),
            "update" => self.update_item(connection_id, request),
            "load" => self.load(connection_id),
            "save" => self.save(connection_id),
            "set_layout" => self.set_layout(connection_id, request),
            "get_layout" => self.get_layout(connection_id, request),
            "set_keyset_layout" => self.set_keyset_layout(connection_id, request),
            "get_keyset_layout" => self.get_keyset_layout(connection_id, request),
            "add_domain_admin" => self.add_domain_admin(connection_id, request),
            "add_project_admin" => self.add_project_admin(connection_id, request),
            "ldap_import" => self.ldap_import(connection_id, request).await,
            "set_user_data" => self.set_user_data(connection_id, request),
            "get_user_data" => self.get_user_data(connection_id, request),
            other => Err(DispatchError::Parameter(format!("unknown event '{other}'"))),
        }
    }

    // -- identity & authorization --------------------------------------

    fn caller(&self, connection_id: ConnectionId) -> Result<String, DispatchError> {
        self.registry
            .get(connection_id)
            .map(|c| c.user)
            .ok_or_else(|| DispatchError::Auth("not logged in".to_owned()))
    }

    fn authorize_scope(&self, scope: &Scope, caller: &str) -> Result<(), DispatchError> {
        let allowed = match scope {
            Scope::Domain(d) => self.store.is_domain_admin(d, caller)?,
            Scope::Project(d, p) => self.store.is_project_admin(d, p, caller)?,
        };
        if allowed {
            Ok(())
        } else {
            Err(DispatchError::Auth(
                "caller is not admin of this entity's scope".to_owned(),
            ))
        }
    }

    /// Resolve `id`'s scope and require the caller to be admin of it. For a
    /// Domain/Project target this degenerates to admin-of-self, since
    /// `get_domain_of` reports a domain's own id (or a project's own
    /// domain+id) as its scope.
    fn authorize_entity(&self, kind: EntityKind, id: &str, caller: &str) -> Result<Scope, DispatchError> {
        let scope = self
            .store
            .get_domain_of(kind, id)?
            .ok_or_else(|| DispatchError::processing(format!("{} '{id}' not found", kind.as_str())))?;
        self.authorize_scope(&scope, caller)?;
        Ok(scope)
    }

    // -- login / session -------------------------------------------------

    async fn login(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            user: Option<String>,
            #[serde(default)]
            password: Option<String>,
            #[serde(default)]
            session: Option<SessionId>,
        }
        let params: Params = param(request)?;
        let client = request
            .client
            .clone()
            .ok_or_else(|| DispatchError::Parameter("client required".to_owned()))?;
        let password = params
            .password
            .ok_or_else(|| DispatchError::Parameter("password required".to_owned()))?;

        if let Some(session) = params.session {
            let existing = self
                .registry
                .by_session(session)
                .ok_or_else(|| DispatchError::Auth("unknown session".to_owned()))?;
            if !self.store.authenticate(&existing.user, &password)? {
                return Err(DispatchError::Auth("invalid credentials".to_owned()));
            }
            self.registry.resume(connection_id, session, &existing.user, &client);
            return Ok(json!({ "session": session }));
        }

        let user = params
            .user
            .ok_or_else(|| DispatchError::Parameter("user required".to_owned()))?;
        let authenticated = if self.config.ldap_enabled {
            self.ldap_bind_as(&user, &password).await?
        } else {
            self.store.authenticate(&user, &password)?
        };
        if !authenticated {
            return Err(DispatchError::Auth("invalid credentials".to_owned()));
        }
        let session = self.registry.login(connection_id, &user, &client);
        Ok(json!({ "session": session }))
    }

    /// Bind as `user` against the configured directory, bounded by
    /// `timeout.ldap_request_usec`. A bind rejection and a timeout are both
    /// reported as `Ok(false)` by this function — the caller maps that to
    /// an `Auth` error either way, per §4.5's "reject or complete" wording.
    async fn ldap_bind_as(&self, user: &str, password: &str) -> Result<bool, DispatchError> {
        let host = self
            .config
            .ldap_host
            .clone()
            .ok_or_else(|| DispatchError::processing("LDAP enabled but no host configured".to_owned()))?;
        let base = self
            .config
            .ldap_base
            .clone()
            .ok_or_else(|| DispatchError::processing("LDAP enabled but no base configured".to_owned()))?;
        let dn = format!("uid={user},{base}");
        let timeout = self.config.vocsdb.timeout.ldap_request();

        let bind = async {
            let (conn, mut ldap) = LdapConnAsync::new(&host)
                .await
                .map_err(|e| DispatchError::processing(format!("ldap connect failed: {e}")))?;
            ldap3::drive!(conn);
            let outcome = ldap
                .simple_bind(&dn, password)
                .await
                .and_then(ldap3::LdapResult::success);
            let _ = ldap.unbind().await;
            Ok::<bool, DispatchError>(outcome.is_ok())
        };

        match tokio::time::timeout(timeout, bind).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout("ldap login timed out".to_owned())),
        }
    }

    fn update_login(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            client: String,
            user: String,
            session: SessionId,
        }
        let params: Params = param(request)?;
        let existing = self
            .registry
            .by_session(params.session)
            .ok_or_else(|| DispatchError::Auth("unknown session".to_owned()))?;
        if existing.user != params.user {
            return Err(DispatchError::Auth("session does not belong to user".to_owned()));
        }
        self.registry.resume(connection_id, params.session, &params.user, &params.client);
        Ok(Value::Null)
    }

    fn update_password(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            user: String,
            password: String,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        if self.config.ldap_enabled {
            return Err(DispatchError::Auth(
                "password changes are LDAP-backed and cannot be made here".to_owned(),
            ));
        }
        if params.user != caller {
            self.authorize_entity(EntityKind::User, &params.user, &caller)?;
        }
        self.store.set_password(&params.user, &params.password)?;
        Ok(Value::Null)
    }

    // -- admin listing ----------------------------------------------------

    fn admin_domains(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            user: Option<String>,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        let target = params.user.unwrap_or(caller);
        Ok(json!(self.store.admin_domains(&target)?))
    }

    fn admin_projects(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            user: Option<String>,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        let target = params.user.unwrap_or(caller);
        let entries = self.store.admin_projects(&target)?;
        serde_json::to_value(entries).map_err(|e| DispatchError::processing(format!("serializing result: {e}")))
    }

    // -- entity CRUD --------------------------------------------------------

    fn check_id_exists(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            id: String,
            #[serde(default)]
            #[expect(dead_code, reason = "accepted for wire compatibility; existence is checked id-wide (I1)")]
            scope: Option<Scope>,
        }
        self.caller(connection_id)?;
        let params: Params = param(request)?;
        for kind in ALL_ENTITY_KINDS {
            if self.store.check_id_exists(kind, &params.id)? {
                return Ok(json!(true));
            }
        }
        Ok(json!(false))
    }

    fn get_entity(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: TypeIdParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.get(params.kind, &params.id)
    }

    fn create_entity(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(rename = "type")]
            kind: EntityKind,
            id: String,
            #[serde(default)]
            scope: Option<Scope>,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        if params.kind == EntityKind::Domain {
            if self.store.admin_domains(&caller)?.is_empty() {
                return Err(DispatchError::Auth(
                    "creating a domain requires existing domain-admin rights".to_owned(),
                ));
            }
            self.store
                .create(EntityKind::Domain, &params.id, Scope::Domain(params.id.clone()))?;
        } else {
            let scope = params
                .scope
                .ok_or_else(|| DispatchError::Parameter("scope required".to_owned()))?;
            self.authorize_scope(&scope, &caller)?;
            self.store.create(params.kind, &params.id, scope)?;
        }
        Ok(Value::Null)
    }

    fn delete_entity(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: TypeIdParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.delete(params.kind, &params.id)?;
        Ok(Value::Null)
    }

    fn get_key(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: KeyParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.get_key(params.kind, &params.id, &params.key)
    }

    fn update_key(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: KeyParams = param(request)?;
        let data = params
            .data
            .ok_or_else(|| DispatchError::Parameter("data required".to_owned()))?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.update_key(params.kind, &params.id, &params.key, data)?;
        Ok(Value::Null)
    }

    /// Not a distinct store primitive: clearing an attribute is expressed
    /// as `update_key` with a JSON `null`, which every per-key handler
    /// already treats as "unset" for optional attributes and rejects as a
    /// parameter error for mandatory ones.
    fn delete_key(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: KeyParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.update_key(params.kind, &params.id, &params.key, Value::Null)?;
        Ok(Value::Null)
    }

    fn verify_item(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: ItemParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.verify_item(params.kind, &params.id, &params.data)?;
        Ok(Value::Null)
    }

    fn update_item(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        let params: ItemParams = param(request)?;
        let caller = self.caller(connection_id)?;
        self.authorize_entity(params.kind, &params.id, &caller)?;
        self.store.update_item(params.kind, &params.id, &params.data)?;
        Ok(Value::Null)
    }

    // -- persistence --------------------------------------------------------

    fn load(&self, connection_id: ConnectionId) -> Result<Value, DispatchError> {
        self.require_domain_admin_anywhere(connection_id)?;
        self.store.load(self.config.vocsdb.path.as_ref())?;
        Ok(Value::Null)
    }

    fn save(&self, connection_id: ConnectionId) -> Result<Value, DispatchError> {
        self.require_domain_admin_anywhere(connection_id)?;
        self.store.save(self.config.vocsdb.path.as_ref())?;
        Ok(Value::Null)
    }

    fn require_domain_admin_anywhere(&self, connection_id: ConnectionId) -> Result<(), DispatchError> {
        let caller = self.caller(connection_id)?;
        if self.store.admin_domains(&caller)?.is_empty() {
            Err(DispatchError::Auth("requires domain-admin rights somewhere".to_owned()))
        } else {
            Ok(())
        }
    }

    // -- layouts --------------------------------------------------------

    fn set_layout(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            role: String,
            layout: std::collections::BTreeMap<String, i32>,
        }
        self.caller(connection_id)?;
        let params: Params = param(request)?;
        self.store.set_role_layout(&params.role, params.layout)?;
        Ok(Value::Null)
    }

    fn get_layout(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            role: String,
        }
        self.caller(connection_id)?;
        let params: Params = param(request)?;
        if !self.store.check_id_exists(EntityKind::Role, &params.role)? {
            return Ok(Value::Null);
        }
        Ok(json!(self.store.get_role_layout(&params.role)?))
    }

    fn set_keyset_layout(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
            name: String,
            layout: KeysetLayout,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        self.authorize_scope(&Scope::Domain(params.domain.clone()), &caller)?;
        self.store.set_keyset_layout(&params.domain, &params.name, params.layout)?;
        Ok(Value::Null)
    }

    fn get_keyset_layout(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
            name: String,
        }
        self.caller(connection_id)?;
        let params: Params = param(request)?;
        let layout = self.store.get_keyset_layout(&params.domain, &params.name)?;
        serde_json::to_value(layout).map_err(|e| DispatchError::processing(format!("serializing result: {e}")))
    }

    // -- admin grants --------------------------------------------------------

    fn add_domain_admin(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
            user: String,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        self.authorize_scope(&Scope::Domain(params.domain.clone()), &caller)?;
        self.store.grant_domain_admin(&params.domain, &params.user)?;
        Ok(Value::Null)
    }

    fn add_project_admin(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            domain: String,
            project: String,
            user: String,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        self.authorize_scope(&Scope::Project(params.domain.clone(), params.project.clone()), &caller)?;
        self.store.grant_project_admin(&params.domain, &params.project, &params.user)?;
        Ok(Value::Null)
    }

    // -- LDAP import --------------------------------------------------------

    async fn ldap_import(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            host: String,
            base: String,
            domain: String,
            user: String,
            password: String,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        self.authorize_scope(&Scope::Domain(params.domain.clone()), &caller)?;
        let import_request = ImportRequest {
            host: params.host,
            base: params.base,
            bind_user: params.user,
            bind_password: params.password,
            domain_id: params.domain,
        };
        let event = self.ldap.import(&self.store, &import_request).await?;
        serde_json::to_value(event).map_err(|e| DispatchError::processing(format!("serializing result: {e}")))
    }

    // -- user data --------------------------------------------------------

    fn set_user_data(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            user: Option<String>,
            data: Value,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        let target = params.user.unwrap_or_else(|| caller.clone());
        if target != caller {
            self.authorize_entity(EntityKind::User, &target, &caller)?;
        }
        self.store.set_user_data(&target, params.data)?;
        Ok(Value::Null)
    }

    fn get_user_data(&self, connection_id: ConnectionId, request: &RequestEnvelope) -> Result<Value, DispatchError> {
        #[derive(Deserialize, Default)]
        struct Params {
            #[serde(default)]
            user: Option<String>,
        }
        let caller = self.caller(connection_id)?;
        let params: Params = param(request)?;
        let target = params.user.unwrap_or_else(|| caller.clone());
        if target != caller {
            self.authorize_entity(EntityKind::User, &target, &caller)?;
        }
        Ok(self.store.get_user_data(&target)?.unwrap_or(Value::Null))
    }
}

#[derive(Deserialize)]
struct TypeIdParams {
    #[serde(rename = "type")]
    kind: EntityKind,
    id: String,
}

#[derive(Deserialize)]
struct KeyParams {
    #[serde(rename = "type")]
    kind: EntityKind,
    id: String,
    key: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct ItemParams {
    #[serde(rename = "type")]
    kind: EntityKind,
    id: String,
    data: Map<String, Value>,
}

fn param<T: serde::de::DeserializeOwned>(request: &RequestEnvelope) -> Result<T, DispatchError> {
    serde_json::from_value(request.parameter.clone())
        .map_err(|e| DispatchError::Parameter(format!("invalid parameters for '{}': {e}", request.event)))
}
