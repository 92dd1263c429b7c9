use serde::Deserialize;

/// One place to collect an observation for. `name` is the human label used
/// in logs and as the stored city name when the API omits one; `query` is
/// the string sent to the API to resolve the place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocationTarget {
    pub name: String,
    pub query: String,
}

impl LocationTarget {
    pub fn new(name: &str, query: &str) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
        }
    }
}

/// The built-in location list. Order is fetch order and nothing more.
pub fn default_locations() -> Vec<LocationTarget> {
    [
        ("Batanes", "Basco,PH"),
        ("Aparri", "Aparri,PH"),
        ("Vigan", "Vigan City,PH"),
        ("Laoag", "Laoag City,PH"),
        ("La Union", "San Fernando City,PH"),
        ("Baguio", "Baguio,PH"),
        ("Tuguegarao", "Tuguegarao City,PH"),
        ("Bataan", "Balanga,PH"),
        ("Dagupan City", "Dagupan,PH"),
        ("Subic", "Subic,PH"),
        ("Tarlac", "Tarlac City,PH"),
        ("Bocaue", "Bocaue,PH"),
        ("Manila", "Manila,PH"),
        ("Taytay", "Taytay,PH"),
        ("Los Banos", "Los Baños,PH"),
        ("Sto Tomas", "Santo Tomas,PH"),
        ("Tagaytay", "Tagaytay,PH"),
        ("Lucena", "Lucena City,PH"),
        ("Naga", "Naga City,PH"),
        ("Puerto Galera", "Puerto Galera,PH"),
        ("Tacloban", "Tacloban City,PH"),
        ("Cebu City", "Cebu City,PH"),
        ("Bohol (Tagbilaran)", "Tagbilaran City,PH"),
        ("Iloilo", "Iloilo City,PH"),
        ("Bacolod", "Bacolod City,PH"),
        ("Puerto Princesa", "Puerto Princesa,PH"),
        ("Butuan", "Butuan City,PH"),
        ("Cagayan De Oro", "Cagayan de Oro,PH"),
        ("Davao City", "Davao City,PH"),
        ("Zamboanga City", "Zamboanga City,PH"),
    ]
    .iter()
    .map(|(name, query)| LocationTarget::new(name, query))
    .collect()
}
