//! Per-kind conveniences over the untyped registry.

use std::marker::PhantomData;
use std::sync::Arc;

use sentinel_config::{EtcdOptions, MongoDbOptions, MySqlOptions, PostgresOptions, RedisOptions};
use sentinel_context::Context;

use super::Registry;
use crate::client::{Client, EtcdClient, MongoClient, MySqlClient, PostgresClient, RedisClient};
use crate::error::RegistryError;
use crate::kind::{Kind, KindOptions};

/// A view of one kind of datasource. Holds nothing but the parent registry
/// and the kind tag.
#[derive(Debug)]
pub struct TypedView<'a, O> {
    registry: &'a Registry,
    kind: Kind,
    options: PhantomData<fn() -> O>,
}

impl<O> Clone for TypedView<'_, O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for TypedView<'_, O> {}

impl<'a, O> TypedView<'a, O>
where
    O: KindOptions,
{
    pub(super) const fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            kind: O::KIND,
            options: PhantomData,
        }
    }

    /// Kind this view addresses.
    #[must_use]
    pub const fn kind(&self) -> Kind {
        self.kind
    }

    /// Registers `options` under `name`.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register(&self, name: &str, options: &O) -> Result<(), RegistryError> {
        self.registry.register(name, options)
    }

    /// Connects `name` if it is not connected yet.
    ///
    /// # Errors
    ///
    /// See [`Registry::init`].
    pub fn init(&self, ctx: &Context, name: &str) -> Result<(), RegistryError> {
        self.registry.init(ctx, self.kind, name)
    }

    /// Looks up `name`, connecting with a background context on first use.
    ///
    /// # Errors
    ///
    /// See [`Registry::get_with_context`].
    pub fn get(&self, name: &str) -> Result<Arc<Client<O>>, RegistryError> {
        self.registry.get(name)
    }

    /// Looks up `name`, connecting with `ctx` on first use.
    ///
    /// # Errors
    ///
    /// See [`Registry::get_with_context`].
    pub fn get_with_context(
        &self,
        ctx: &Context,
        name: &str,
    ) -> Result<Arc<Client<O>>, RegistryError> {
        self.registry.get_with_context(ctx, name)
    }

    /// Looks up `name` or panics.
    ///
    /// # Panics
    ///
    /// Panics when the lookup fails.
    #[must_use]
    pub fn must_get(&self, name: &str) -> Arc<Client<O>> {
        self.registry.must_get(name)
    }
}

macro_rules! kind_accessors {
    ($(
        $label:literal, $options:ty, $client:ty =>
            $view:ident, $register:ident, $init:ident, $get:ident, $get_with_context:ident, $must_get:ident;
    )*) => {
        impl Registry {
            $(
                #[doc = concat!("View over the ", $label, " datasources.")]
                #[must_use]
                pub const fn $view(&self) -> TypedView<'_, $options> {
                    TypedView::new(self)
                }

                #[doc = concat!("Registers a ", $label, " datasource.")]
                ///
                /// # Errors
                ///
                /// See [`Registry::register`].
                pub fn $register(&self, name: &str, options: &$options) -> Result<(), RegistryError> {
                    self.register(name, options)
                }

                #[doc = concat!("Connects the ", $label, " datasource `name`.")]
                ///
                /// # Errors
                ///
                /// See [`Registry::init`].
                pub fn $init(&self, ctx: &Context, name: &str) -> Result<(), RegistryError> {
                    self.init(ctx, <$options as KindOptions>::KIND, name)
                }

                #[doc = concat!("Looks up the ", $label, " datasource `name`.")]
                ///
                /// # Errors
                ///
                /// See [`Registry::get_with_context`].
                pub fn $get(&self, name: &str) -> Result<Arc<$client>, RegistryError> {
                    self.get(name)
                }

                #[doc = concat!("Looks up the ", $label, " datasource `name`, connecting with `ctx`.")]
                ///
                /// # Errors
                ///
                /// See [`Registry::get_with_context`].
                pub fn $get_with_context(
                    &self,
                    ctx: &Context,
                    name: &str,
                ) -> Result<Arc<$client>, RegistryError> {
                    self.get_with_context(ctx, name)
                }

                #[doc = concat!("Looks up the ", $label, " datasource `name` or panics.")]
                ///
                /// # Panics
                ///
                /// Panics when the lookup fails.
                #[must_use]
                pub fn $must_get(&self, name: &str) -> Arc<$client> {
                    self.must_get(name)
                }
            )*
        }
    };
}

kind_accessors! {
    "MySQL", MySqlOptions, MySqlClient =>
        mysql, register_mysql, init_mysql, get_mysql, get_mysql_with_context, must_get_mysql;
    "PostgreSQL", PostgresOptions, PostgresClient =>
        postgres, register_postgres, init_postgres, get_postgres, get_postgres_with_context,
        must_get_postgres;
    "Redis", RedisOptions, RedisClient =>
        redis, register_redis, init_redis, get_redis, get_redis_with_context, must_get_redis;
    "MongoDB", MongoDbOptions, MongoClient =>
        mongodb, register_mongodb, init_mongodb, get_mongodb, get_mongodb_with_context,
        must_get_mongodb;
    "etcd", EtcdOptions, EtcdClient =>
        etcd, register_etcd, init_etcd, get_etcd, get_etcd_with_context, must_get_etcd;
}
