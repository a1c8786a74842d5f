use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_users_table::Migration),
            Box::new(m20240601_000002_create_requests_table::Migration),
            Box::new(m20240601_000003_create_payment_attempts_table::Migration),
            Box::new(m20240601_000004_create_outbox_events_table::Migration),
        ]
    }
}

mod m20240601_000001_create_users_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_users_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Profile rows keyed by the identity service subject
            manager
                .create_table(
                    Table::create()
                        .table(Users::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Users::UserId)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Users::Name).string().not_null())
                        .col(ColumnDef::new(Users::Email).string().not_null())
                        .col(
                            ColumnDef::new(Users::Role)
                                .string()
                                .not_null()
                                .default("citizen"),
                        )
                        .col(ColumnDef::new(Users::Nin).string().null())
                        .col(ColumnDef::new(Users::DateOfBirth).string().null())
                        .col(
                            ColumnDef::new(Users::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Users::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Users::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Users {
        Table,
        UserId,
        Name,
        Email,
        Role,
        Nin,
        DateOfBirth,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_requests_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_requests_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Requests::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Requests::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Requests::UserId).string().not_null())
                        .col(ColumnDef::new(Requests::ServiceType).string().not_null())
                        .col(ColumnDef::new(Requests::FormData).json().not_null())
                        .col(ColumnDef::new(Requests::Price).big_integer().not_null())
                        .col(ColumnDef::new(Requests::PaymentStatus).string().not_null())
                        .col(
                            ColumnDef::new(Requests::PaymentReference)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Requests::Timestamp)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One record per payment reference; makes persist idempotent under retry
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requests_payment_reference")
                        .table(Requests::Table)
                        .col(Requests::PaymentReference)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_requests_user_timestamp")
                        .table(Requests::Table)
                        .col(Requests::UserId)
                        .col(Requests::Timestamp)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Requests::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Requests {
        Table,
        Id,
        UserId,
        ServiceType,
        FormData,
        Price,
        PaymentStatus,
        PaymentReference,
        Timestamp,
    }
}

mod m20240601_000003_create_payment_attempts_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_payment_attempts_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Audit trail of checkout attempts, including ones that never became requests
            manager
                .create_table(
                    Table::create()
                        .table(PaymentAttempts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentAttempts::Reference)
                                .string()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::UserId).string().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::ServiceType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::FormData).json().not_null())
                        .col(
                            ColumnDef::new(PaymentAttempts::Price)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PaymentAttempts::Currency).string().not_null())
                        .col(ColumnDef::new(PaymentAttempts::Email).string().not_null())
                        .col(ColumnDef::new(PaymentAttempts::Status).string().not_null())
                        .col(ColumnDef::new(PaymentAttempts::FailureReason).string().null())
                        .col(ColumnDef::new(PaymentAttempts::RequestId).integer().null())
                        .col(
                            ColumnDef::new(PaymentAttempts::ProviderConfirmedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PaymentAttempts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_user_id")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payment_attempts_status")
                        .table(PaymentAttempts::Table)
                        .col(PaymentAttempts::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentAttempts::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PaymentAttempts {
        Table,
        Reference,
        UserId,
        ServiceType,
        FormData,
        Price,
        AmountMinor,
        Currency,
        Email,
        Status,
        FailureReason,
        RequestId,
        ProviderConfirmedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_outbox_events_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_outbox_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OutboxEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OutboxEvents::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OutboxEvents::Reference).string().not_null())
                        .col(ColumnDef::new(OutboxEvents::EventType).string().not_null())
                        .col(ColumnDef::new(OutboxEvents::Payload).json().not_null())
                        .col(ColumnDef::new(OutboxEvents::Status).string().not_null())
                        .col(
                            ColumnDef::new(OutboxEvents::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OutboxEvents::AvailableAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OutboxEvents::LastError).string().null())
                        .col(
                            ColumnDef::new(OutboxEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OutboxEvents::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OutboxEvents::ProcessedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // At most one pending write per payment reference
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_outbox_events_reference")
                        .table(OutboxEvents::Table)
                        .col(OutboxEvents::Reference)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_outbox_events_status_available")
                        .table(OutboxEvents::Table)
                        .col(OutboxEvents::Status)
                        .col(OutboxEvents::AvailableAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OutboxEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OutboxEvents {
        Table,
        Id,
        Reference,
        EventType,
        Payload,
        Status,
        Attempts,
        AvailableAt,
        LastError,
        CreatedAt,
        UpdatedAt,
        ProcessedAt,
    }
}
