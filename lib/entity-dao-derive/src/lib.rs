use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert PascalCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);

    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Apply a serde `rename_all` rule to a snake_case field name
fn apply_rename_all(field_name: &str, rule: Option<&str>) -> String {
    match rule {
        Some("camelCase") => to_camel_case(field_name),
        Some("PascalCase") => {
            let camel = to_camel_case(field_name);
            let mut chars = camel.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => camel,
            }
        }
        Some("SCREAMING_SNAKE_CASE") | Some("UPPERCASE") => field_name.to_ascii_uppercase(),
        Some("kebab-case") => field_name.replace('_', "-"),
        _ => field_name.to_string(),
    }
}

/// Check if a field has a specific attribute
fn has_attr(field: &syn::Field, attr_name: &str) -> bool {
    field
        .attrs
        .iter()
        .any(|attr| attr.path().is_ident(attr_name))
}

/// Check if a field has #[column(skip)] or #[serde(skip)]
fn has_column_skip(field: &syn::Field) -> bool {
    for attr in &field.attrs {
        if attr.path().is_ident("column") || attr.path().is_ident("serde") {
            let mut skip = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                } else if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<Lit>()?;
                }
                Ok(())
            });
            if skip {
                return true;
            }
        }
    }
    false
}

/// Read a `key = "value"` string from the named attribute, if present
fn get_attr_string(attrs: &[syn::Attribute], attr_name: &str, key: &str) -> Option<String> {
    for attr in attrs {
        if attr.path().is_ident(attr_name) {
            let mut value = None;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(key) {
                    let lit: Lit = meta.value()?.parse()?;
                    if let Lit::Str(s) = lit {
                        value = Some(s.value());
                    }
                } else if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse::<Lit>()?;
                }
                Ok(())
            });
            if value.is_some() {
                return value;
            }
        }
    }
    None
}

/// Get the referenced entity type from #[references(Type)]
fn get_references(field: &syn::Field) -> syn::Result<Option<syn::Type>> {
    for attr in &field.attrs {
        if attr.path().is_ident("references") {
            return attr.parse_args::<syn::Type>().map(Some);
        }
    }
    Ok(None)
}

/// Strip `Option<...>` from a type's token string
fn unwrap_option(type_str: &str) -> Option<&str> {
    if type_str.starts_with("Option<") && type_str.ends_with('>') {
        Some(&type_str[7..type_str.len() - 1])
    } else {
        None
    }
}

/// Map Rust type to generic SQL type name
fn rust_type_to_sql_type(ty: &syn::Type) -> &'static str {
    let type_str = quote::quote!(#ty).to_string();
    // Remove spaces for easier matching
    let type_str = type_str.replace(' ', "");
    let inner_type = unwrap_option(&type_str).unwrap_or(type_str.as_str());

    match inner_type {
        s if s.contains("DateTime") => "datetime",
        "u64" | "i64" => "bigint",
        "u32" | "i32" | "u16" | "i16" | "u8" | "i8" | "usize" | "isize" => "integer",
        "f64" | "f32" => "double",
        "bool" => "boolean",
        s if s.starts_with("Vec<")
            || s.contains("HashMap<")
            || s.contains("BTreeMap<")
            || s.ends_with("Value") =>
        {
            "json"
        }
        // Default to text for String and everything else
        _ => "text",
    }
}

/// Derive macro for the `Entity` trait.
///
/// ## Attributes
///
/// Container:
/// - `#[entity(table = "...")]` - table name (default: snake_case type name)
/// - `#[entity(name = "...")]` - entity name used for conventional foreign
///   keys (default: snake_case type name)
///
/// Fields:
/// - `#[id]` - primary key (default: the field named `id`). `Option<int>`
///   ids are transient while `None`; plain integer ids while `0`.
/// - `#[references(Other)]` - foreign key to another entity
/// - `#[column(name = "...")]` - override the column name
/// - `#[column(skip)]` - not stored (also implied by `#[serde(skip)]`)
///
/// Serde `rename_all` on the container and `rename` on fields are honoured
/// when computing `json_keys()`.
///
/// ## Generated
///
/// - `Entity` implementation
/// - `new(fields...)` constructor leaving the id unset, when the id is an
///   `Option` (skipped fields use `Default::default()`)
///
/// ## Example
///
/// ```text
/// #[derive(Entity, Serialize, Deserialize, Clone)]
/// #[entity(table = "posts")]
/// #[serde(rename_all = "camelCase")]
/// pub struct Post {
///     #[serde(skip_serializing_if = "Option::is_none")]
///     pub id: Option<i64>,
///     #[references(User)]
///     pub user_id: Option<i64>,
///     pub title: String,
/// }
/// // Use: let post = Post::new(Some(user_id), "hello".into());
/// ```
#[proc_macro_derive(Entity, attributes(entity, id, references, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_entity(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand_entity(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Entity only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "Entity only supports structs")),
    };

    let entity_name = get_attr_string(&input.attrs, "entity", "name")
        .unwrap_or_else(|| to_snake_case(&name.to_string()));
    let table_name =
        get_attr_string(&input.attrs, "entity", "table").unwrap_or_else(|| entity_name.clone());
    let rename_all = get_attr_string(&input.attrs, "serde", "rename_all");

    let id_field = fields
        .iter()
        .find(|f| has_attr(f, "id"))
        .or_else(|| {
            fields
                .iter()
                .find(|f| f.ident.as_ref().is_some_and(|ident| ident == "id"))
        })
        .ok_or_else(|| {
            syn::Error::new_spanned(name, "No field marked with #[id] and no field named `id`")
        })?;
    let id_field_name = id_field
        .ident
        .as_ref()
        .ok_or_else(|| syn::Error::new_spanned(id_field, "Field must have a name"))?;

    // Collect column names, types, and JSON keys for all non-skipped fields
    let mut column_names: Vec<String> = Vec::new();
    let mut column_types: Vec<&'static str> = Vec::new();
    let mut json_keys: Vec<String> = Vec::new();
    let mut foreign_keys = Vec::new();
    let mut id_column = None;

    // Parameters for new(): every stored field except the id
    let mut new_params = Vec::new();
    let mut new_field_inits = Vec::new();

    for field in fields.iter() {
        let field_name = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "Field must have a name"))?;
        let field_ty = &field.ty;
        let is_id = field_name == id_field_name;

        if has_column_skip(field) {
            if is_id {
                return Err(syn::Error::new_spanned(field, "The id field cannot be skipped"));
            }
            new_field_inits.push(quote! { #field_name: ::std::default::Default::default() });
            continue;
        }

        let col_name = get_attr_string(&field.attrs, "column", "name")
            .unwrap_or_else(|| field_name.to_string());
        let json_key = get_attr_string(&field.attrs, "serde", "rename")
            .unwrap_or_else(|| apply_rename_all(&field_name.to_string(), rename_all.as_deref()));

        if let Some(target) = get_references(field)? {
            let column = col_name.clone();
            foreign_keys.push(quote! {
                entity_dao::ForeignKey {
                    column: #column,
                    references: <#target as entity_dao::Entity>::table_name,
                }
            });
        }

        if is_id {
            id_column = Some(col_name.clone());
            new_field_inits.push(quote! { #field_name: None });
        } else {
            new_params.push(quote! { #field_name: #field_ty });
            new_field_inits.push(quote! { #field_name });
        }

        column_types.push(rust_type_to_sql_type(field_ty));
        column_names.push(col_name);
        json_keys.push(json_key);
    }

    let id_column = id_column
        .ok_or_else(|| syn::Error::new_spanned(id_field, "The id field must be stored"))?;

    let id_ty = &id_field.ty;
    let id_type_str = quote!(#id_ty).to_string().replace(' ', "");
    let id_inner = unwrap_option(&id_type_str);
    let id_is_optional = id_inner.is_some();
    let id_value_ty: syn::Type = match id_inner {
        Some(inner) => syn::parse_str(inner)?,
        None => id_ty.clone(),
    };

    let (entity_id_body, set_entity_id_body) = if id_is_optional {
        (
            quote! { self.#id_field_name.map(|id| id as i64) },
            quote! { self.#id_field_name = Some(narrowed); },
        )
    } else {
        (
            quote! {
                if self.#id_field_name == 0 {
                    None
                } else {
                    Some(self.#id_field_name as i64)
                }
            },
            quote! { self.#id_field_name = narrowed; },
        )
    };

    let new_impl = if id_is_optional {
        quote! {
            impl #name {
                /// Create a transient instance; the id is assigned on store.
                pub fn new(#(#new_params),*) -> Self {
                    Self {
                        #(#new_field_inits),*
                    }
                }
            }
        }
    } else {
        quote! {}
    };

    let column_count = column_names.len();
    let column_literals: Vec<_> = column_names.iter().map(|s| s.as_str()).collect();
    let json_key_literals: Vec<_> = json_keys.iter().map(|s| s.as_str()).collect();

    let expanded = quote! {
        impl entity_dao::Entity for #name {
            fn table_name() -> &'static str {
                #table_name
            }

            fn entity_name() -> &'static str {
                #entity_name
            }

            fn columns() -> &'static [&'static str] {
                &[#(#column_literals),*]
            }

            fn column_types() -> &'static [&'static str] {
                &[#(#column_types),*]
            }

            fn json_keys() -> &'static [&'static str] {
                &[#(#json_key_literals),*]
            }

            fn id_column() -> &'static str {
                #id_column
            }

            fn foreign_keys() -> &'static [entity_dao::ForeignKey] {
                const KEYS: &[entity_dao::ForeignKey] = &[#(#foreign_keys),*];
                KEYS
            }

            #[allow(clippy::unnecessary_cast)]
            fn entity_id(&self) -> Option<i64> {
                #entity_id_body
            }

            #[allow(clippy::useless_conversion)]
            fn set_entity_id(&mut self, id: i64) -> Result<(), entity_dao::StorageError> {
                let narrowed: #id_value_ty = ::core::convert::TryInto::try_into(id).map_err(|_| {
                    entity_dao::StorageError::Mapping(format!(
                        "Id {} does not fit the id field of {}",
                        id, #table_name
                    ))
                })?;
                #set_entity_id_body
                Ok(())
            }

            fn column_count() -> usize {
                #column_count
            }
        }

        #new_impl
    };

    Ok(expanded)
}
