use proc_macro::TokenStream;
use quote::quote;
use syn::ItemFn;

/// Runs an async test against a **pgstac** database inside a transaction
/// that is rolled back afterwards.
///
/// The surrounding module must provide a `POOL` static resolving to an
/// `Option` of a bb8 pool; when it resolves to `None` (no
/// `PGSTAC_RS_TEST_DB`) the test returns early.
#[proc_macro_attribute]
pub fn pgstac_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    impl_pgstac_test(ast)
}

fn impl_pgstac_test(ast: ItemFn) -> TokenStream {
    let ident = &ast.sig.ident;
    let gen = quote! {
        #[tokio::test]
        async fn #ident() {
            let Some(pool) = POOL.get().await else {
                eprintln!("skipping {}: PGSTAC_RS_TEST_DB is not set", stringify!(#ident));
                return;
            };
            let mut connection = pool.get().await.unwrap();
            let transaction = connection.transaction().await.unwrap();
            let client = Client::new(transaction);
            #ast
            #ident(&client).await;
            client.into_inner().rollback().await.unwrap();
        }
    };
    gen.into()
}
